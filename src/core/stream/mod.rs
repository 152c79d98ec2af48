//! Stream client
//!
//! Owns the long-lived push connection for one match. Lifecycle on every
//! (re)connect:
//!
//! 1. catch-up: fetch events after the committed checkpoint and admit them
//!    in received order
//! 2. open: decode inbound frames and admit them
//! 3. reconnect: exponential backoff (doubling to a ceiling, ±20% jitter)
//!    and back to 1
//!
//! The client exposes a coarse status for observability and unwinds through
//! the backoff sleep and any in-flight call when cancelled.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::api::ApiClient;
use crate::core::event::Event;
use crate::core::queue::{AdmitOutcome, EventQueue};

/// Heartbeat cadence on the push connection.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long an unanswered ping is tolerated before the connection is
/// declared dead.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Coarse connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Connected,
    Reconnecting,
    Closed,
}

/// Handle on a running stream client.
pub struct StreamHandle {
    cancel: CancellationToken,
    status: watch::Receiver<StreamStatus>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn status(&self) -> StreamStatus {
        *self.status.borrow()
    }

    /// Cancel the client and wait for it to unwind.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

pub struct StreamClient {
    config: EngineConfig,
    api: std::sync::Arc<ApiClient>,
    queue: EventQueue,
    match_id: String,
}

impl StreamClient {
    pub fn new(
        config: EngineConfig,
        api: std::sync::Arc<ApiClient>,
        queue: EventQueue,
        match_id: String,
    ) -> Self {
        Self {
            config,
            api,
            queue,
            match_id,
        }
    }

    /// Start the client on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> StreamHandle {
        let (status_tx, status_rx) = watch::channel(StreamStatus::Reconnecting);
        let client_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            self.run(client_cancel, status_tx).await;
        });

        StreamHandle {
            cancel,
            status: status_rx,
            task,
        }
    }

    async fn run(self, cancel: CancellationToken, status_tx: watch::Sender<StreamStatus>) {
        let mut backoff = self.config.reconnect_initial;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.catch_up(&cancel).await;

            if cancel.is_cancelled() {
                break;
            }

            match self.connect_and_pump(&cancel, &status_tx).await {
                Ok(()) => break, // cancelled mid-session
                Err(e) => {
                    warn!("Push connection lost: {}", e);
                    // A fresh outage starts the backoff ladder over.
                    if *status_tx.borrow() == StreamStatus::Connected {
                        backoff = self.config.reconnect_initial;
                    }
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            let _ = status_tx.send(StreamStatus::Reconnecting);
            let delay = jittered(backoff);
            info!("Reconnecting in {:.1}s", delay.as_secs_f64());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            backoff = (backoff * 2).min(self.config.reconnect_max);
        }

        let _ = status_tx.send(StreamStatus::Closed);
        info!("Stream client closed");
    }

    /// Catch-up phase: replay events missed since the checkpoint.
    ///
    /// The batch is chronological; entries at or before the committed id
    /// are dropped here (the endpoint may be sloppy about the boundary) and
    /// the dedup set rejects exact repeats of anything already admitted.
    async fn catch_up(&self, cancel: &CancellationToken) {
        let after_id = self.queue.checkpoint();

        let fetch = self.api.fetch_missed_events(&self.match_id, after_id.as_deref());
        let events = tokio::select! {
            _ = cancel.cancelled() => return,
            result = fetch => match result {
                Ok(events) => events,
                Err(e) => {
                    warn!("Missed-events fetch failed: {}", e);
                    return;
                }
            }
        };

        if events.is_empty() {
            debug!("No missed events");
            return;
        }

        // Drop everything up to and including the committed id when it
        // appears in the batch.
        let start = after_id
            .as_deref()
            .and_then(|last| events.iter().position(|e| e.event_id == last))
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut admitted = 0usize;
        for event in events.into_iter().skip(start) {
            if self.queue.admit(event) == AdmitOutcome::Admitted {
                admitted += 1;
            }
        }
        info!("Catch-up admitted {} missed events", admitted);
    }

    async fn connect_and_pump(
        &self,
        cancel: &CancellationToken,
        status_tx: &watch::Sender<StreamStatus>,
    ) -> Result<(), String> {
        let url = self.config.ws_url(&self.match_id);
        let request = self.build_request(&url)?;

        debug!("Connecting to push channel: {}", url);
        let connect = connect_async(request);
        let (ws_stream, _response) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = connect => result.map_err(|e| format!("connect failed: {e}"))?,
        };

        info!("Push channel connected for match {}", self.match_id);
        let _ = status_tx.send(StreamStatus::Connected);

        let (mut sink, mut stream) = ws_stream.split();
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_interval.reset();
        let mut awaiting_pong_since: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }

                _ = ping_interval.tick() => {
                    if let Some(since) = awaiting_pong_since {
                        if since.elapsed() > PING_TIMEOUT {
                            return Err("heartbeat timed out".to_string());
                        }
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return Err("failed to send ping".to_string());
                    }
                    awaiting_pong_since = Some(tokio::time::Instant::now());
                }

                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong_since = None;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(format!("server closed connection: {frame:?}"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(format!("websocket error: {e}")),
                    None => return Err("stream ended".to_string()),
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match Event::parse(text) {
            Ok(event) => {
                let event_id = event.event_id.clone();
                match self.queue.admit(event) {
                    AdmitOutcome::Admitted => debug!("Admitted event {}", event_id),
                    AdmitOutcome::Duplicate => debug!("Duplicate event {}", event_id),
                }
            }
            Err(e) => {
                error!("Dropping malformed push frame: {}", e);
            }
        }
    }

    /// Build the WebSocket upgrade request, carrying the optional bearer
    /// token from config.
    fn build_request(
        &self,
        url: &str,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, String> {
        let host = url
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .ok_or_else(|| format!("invalid push URL: {url}"))?
            .to_string();

        let mut builder = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(url)
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13");

        if let Some(token) = &self.config.ws_auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        builder
            .body(())
            .map_err(|e| format!("failed to build upgrade request: {e}"))
    }
}

/// Apply ±20% jitter to a backoff delay.
fn jittered(delay: Duration) -> Duration {
    let factor = 0.8 + rand::random::<f64>() * 0.4;
    delay.mul_f64(factor)
}
