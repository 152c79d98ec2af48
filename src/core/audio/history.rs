//! Audio history sink
//!
//! Best-effort archival of spoken commentary: the mixed span of each
//! finished event is written as a WAV under the configured directory and a
//! metadata row is appended to `history.jsonl` alongside it. A bounded
//! channel decouples the sink from the pipeline; when the writer falls
//! behind, jobs are dropped and logged, never retried, and nothing here can
//! block or fail the core.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Queue depth before jobs are dropped.
const CHANNEL_CAPACITY: usize = 16;

/// How long shutdown waits for the writer to drain.
const FLUSH_DEADLINE: Duration = Duration::from_secs(2);

/// One finished utterance to archive.
pub struct HistoryJob {
    pub event_id: String,
    pub match_id: String,
    /// Mixed mono samples over the event's span.
    pub samples: Vec<f32>,
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    event_id: &'a str,
    match_id: &'a str,
    path: String,
    duration_seconds: f64,
    created_at: String,
}

/// Handle on the background writer.
pub struct HistorySink {
    tx: Option<mpsc::Sender<HistoryJob>>,
    handle: Option<JoinHandle<()>>,
}

impl HistorySink {
    pub fn spawn(dir: PathBuf, sample_rate: u32) -> Self {
        let (tx, mut rx) = mpsc::channel::<HistoryJob>(CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                error!(
                    "Cannot create audio history dir {}: {} - history disabled",
                    dir.display(),
                    e
                );
                // Drain and drop so producers never see a closed channel
                // as an error path.
                while rx.recv().await.is_some() {}
                return;
            }

            while let Some(job) = rx.recv().await {
                if let Err(e) = write_job(&dir, sample_rate, job).await {
                    error!("Audio history write failed: {}", e);
                }
            }
            debug!("Audio history sink drained");
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Queue an utterance for archival. Drops (with a log line) when the
    /// writer is behind.
    pub fn submit(&self, job: HistoryJob) {
        let Some(tx) = &self.tx else { return };
        if let Err(mpsc::error::TrySendError::Full(job)) = tx.try_send(job) {
            warn!(
                "Audio history queue full, dropping event {}",
                job.event_id
            );
        }
    }

    /// Close the channel and give the writer up to 2 s to drain.
    pub async fn shutdown(mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(FLUSH_DEADLINE, handle).await.is_err() {
                warn!("Audio history sink did not drain within deadline");
            }
        }
    }
}

async fn write_job(dir: &std::path::Path, sample_rate: u32, job: HistoryJob) -> std::io::Result<()> {
    let duration_seconds = job.samples.len() as f64 / sample_rate as f64;
    let file_name = format!("{}.wav", sanitize(&job.event_id));
    let wav_path = dir.join(&file_name);

    let samples = job.samples;
    let path_for_writer = wav_path.clone();
    tokio::task::spawn_blocking(move || write_wav(&path_for_writer, sample_rate, &samples))
        .await
        .map_err(std::io::Error::other)?
        .map_err(std::io::Error::other)?;

    let row = HistoryRow {
        event_id: &job.event_id,
        match_id: &job.match_id,
        path: wav_path.display().to_string(),
        duration_seconds,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let mut line = serde_json::to_string(&row)?;
    line.push('\n');

    let index_path = dir.join("history.jsonl");
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&index_path)
        .await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes()).await?;

    debug!(
        "Archived event {} ({:.2}s) to {}",
        job.event_id,
        duration_seconds,
        wav_path.display()
    );
    Ok(())
}

fn write_wav(path: &std::path::Path, sample_rate: u32, samples: &[f32]) -> hound::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value)?;
    }
    writer.finalize()
}

/// Event ids land in file names; keep them filesystem-safe.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
