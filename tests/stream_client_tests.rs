//! Stream client integration tests against a local server double.
//!
//! The double speaks just enough HTTP to serve the missed-events endpoint
//! and upgrades `/ws/live-commentary/...` connections, so catch-up,
//! live delivery, dedup and reconnect are exercised over real sockets.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use wicketcast::config::EngineConfig;
use wicketcast::core::api::ApiClient;
use wicketcast::core::checkpoint::CheckpointStore;
use wicketcast::core::queue::EventQueue;
use wicketcast::core::stream::{StreamClient, StreamStatus};

const CLOSE_SENTINEL: &str = "__CLOSE__";

struct TestServer {
    base_url: String,
    missed: Arc<Mutex<Vec<serde_json::Value>>>,
    frames: broadcast::Sender<String>,
    ws_connections: Arc<AtomicUsize>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let missed: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let (frames, _) = broadcast::channel::<String>(64);
        let ws_connections = Arc::new(AtomicUsize::new(0));

        let server_missed = missed.clone();
        let server_frames = frames.clone();
        let server_connections = ws_connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let missed = server_missed.clone();
                let frames = server_frames.clone();
                let connections = server_connections.clone();
                tokio::spawn(async move {
                    handle_connection(stream, missed, frames, connections).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            missed,
            frames,
            ws_connections,
        }
    }

    fn set_missed_events(&self, events: Vec<serde_json::Value>) {
        *self.missed.lock() = events;
    }

    fn push(&self, frame: &str) {
        let _ = self.frames.send(frame.to_string());
    }

    fn drop_connections(&self) {
        let _ = self.frames.send(CLOSE_SENTINEL.to_string());
    }

    fn connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    missed: Arc<Mutex<Vec<serde_json::Value>>>,
    frames: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
) {
    let mut peeked = [0u8; 1024];
    let Ok(n) = stream.peek(&mut peeked).await else {
        return;
    };
    let head = String::from_utf8_lossy(&peeked[..n]).to_string();

    if head.contains("/ws/live-commentary/") {
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let mut rx = frames.subscribe();
        connections.fetch_add(1, Ordering::SeqCst);
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Ok(frame) if frame == CLOSE_SENTINEL => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    Ok(frame) => {
                        if ws.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                message = ws.next() => match message {
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    } else {
        // Plain HTTP: consume the request, then answer.
        let mut sink = [0u8; 1024];
        let _ = stream.read(&mut sink).await;

        let response = if head.starts_with("GET /commentary/missed-events") {
            let body = serde_json::to_string(&*missed.lock()).unwrap();
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        } else {
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        };
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

fn test_config(base_url: &str) -> EngineConfig {
    EngineConfig {
        api_base_url: base_url.to_string(),
        ws_auth_token: None,
        match_id: Some("m1".to_string()),
        api_timeout: Duration::from_secs(2),
        match_poll_interval: Duration::from_secs(30),
        elevenlabs_api_key: "test-key".to_string(),
        elevenlabs_voice_id: "voice".to_string(),
        tts_model_id: "eleven_multilingual_v2".to_string(),
        tts_base_url: "http://127.0.0.1:1".to_string(),
        tts_timeout: Duration::from_secs(8),
        sample_rate: 22050,
        nominal_ambience_gain: 0.30,
        ducked_ambience_gain: 0.08,
        duck_ramp_ms: 200,
        ambience_path: PathBuf::from("unused.wav"),
        state_path: PathBuf::from("unused.json"),
        audio_history_dir: PathBuf::from("unused"),
        save_audio: false,
        reconnect_initial: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
    }
}

fn wire_event(event_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "event_id": event_id,
        "match_id": "m1",
        "sentences": text,
        "intensity": "normal",
        "priority_class": "normal"
    })
}

async fn next_event_id(queue: &EventQueue) -> String {
    tokio::time::timeout(Duration::from_secs(2), queue.next())
        .await
        .expect("queue should yield an event")
        .expect("queue open")
        .event_id
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_catch_up_then_live_delivery() {
    let server = TestServer::spawn().await;
    // The endpoint is sloppy and replays through the committed id.
    server.set_missed_events(vec![
        wire_event("e4", "old"),
        wire_event("e5", "old"),
        wire_event("e6", "Six runs!"),
        wire_event("e7", "Dot ball."),
    ]);

    let dir = tempfile::TempDir::new().unwrap();
    let queue = EventQueue::load(CheckpointStore::new(dir.path().join("state.json"))).await;
    queue.set_match_id("m1").await;
    queue.commit("e5").await;

    let config = test_config(&server.base_url);
    let api = Arc::new(ApiClient::new(&config.api_base_url, config.api_timeout).unwrap());
    let client = StreamClient::new(config, api, queue.clone(), "m1".to_string());
    let handle = client.spawn(CancellationToken::new());

    wait_for("connection", || server.connection_count() == 1).await;
    wait_for("connected status", || {
        handle.status() == StreamStatus::Connected
    })
    .await;

    // Catch-up admitted only the events after the checkpoint.
    assert_eq!(next_event_id(&queue).await, "e6");
    assert_eq!(next_event_id(&queue).await, "e7");

    // Live events flow through, malformed frames are dropped.
    server.push("{definitely not json");
    server.push(&wire_event("e8", "Four runs!").to_string());
    assert_eq!(next_event_id(&queue).await, "e8");

    // A live repeat of a catch-up event is deduplicated.
    server.push(&wire_event("e7", "Dot ball.").to_string());
    let drained = tokio::time::timeout(Duration::from_millis(300), queue.next()).await;
    assert!(drained.is_err(), "duplicate must not be delivered");

    handle.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let server = TestServer::spawn().await;
    server.set_missed_events(vec![]);

    let dir = tempfile::TempDir::new().unwrap();
    let queue = EventQueue::load(CheckpointStore::new(dir.path().join("state.json"))).await;
    queue.set_match_id("m1").await;

    let config = test_config(&server.base_url);
    let api = Arc::new(ApiClient::new(&config.api_base_url, config.api_timeout).unwrap());
    let client = StreamClient::new(config, api, queue.clone(), "m1".to_string());
    let handle = client.spawn(CancellationToken::new());

    wait_for("first connection", || server.connection_count() == 1).await;

    // Sever the push connection; the client must come back on its own.
    server.drop_connections();
    wait_for("reconnection", || server.connection_count() == 2).await;

    // Give the fresh connection's subscription a moment, then deliver.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.push(&wire_event("e9", "Back live!").to_string());
    assert_eq!(next_event_id(&queue).await, "e9");

    handle.stop().await;
}

#[tokio::test]
async fn test_stop_unwinds_through_backoff() {
    // No server at all: the client sits in its reconnect loop.
    let config = test_config("http://127.0.0.1:1");
    let api = Arc::new(ApiClient::new(&config.api_base_url, config.api_timeout).unwrap());

    let dir = tempfile::TempDir::new().unwrap();
    let queue = EventQueue::load(CheckpointStore::new(dir.path().join("state.json"))).await;

    let client = StreamClient::new(config, api, queue, "m1".to_string());
    let handle = client.spawn(CancellationToken::new());

    tokio::time::sleep(Duration::from_millis(100)).await;

    // stop() must return promptly even while disconnected.
    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("stop should unwind through the backoff sleep");
}
