//! Durable runtime state
//!
//! A single JSON record, `{match_id, last_spoken_event_id, last_update}`,
//! persisted after every commit so a restarted process can ask the
//! missed-events endpoint for exactly the events it has not spoken.
//! Writes are atomic: serialize to `<path>.tmp`, fsync, rename over the
//! target.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Errors that can occur while reading or writing the state file.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// The persisted record. Field names are the on-disk contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub match_id: Option<String>,
    pub last_spoken_event_id: Option<String>,
    #[serde(default)]
    pub last_update: u64,
}

/// Handle on the runtime-state file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, if any.
    ///
    /// A missing file means a fresh start. A corrupt file is treated the
    /// same way (logged); restart-safety then degrades to dedup alone.
    pub async fn load(&self) -> CheckpointResult<Option<RuntimeState>> {
        match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<RuntimeState>(&bytes) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    warn!(
                        "Runtime state file {} is corrupt, starting fresh: {}",
                        self.path.display(),
                        e
                    );
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the persisted state.
    ///
    /// `last_update` is stamped here with the current unix time.
    pub async fn save(
        &self,
        match_id: Option<&str>,
        last_spoken_event_id: Option<&str>,
    ) -> CheckpointResult<()> {
        let state = RuntimeState {
            match_id: match_id.map(str::to_string),
            last_spoken_event_id: last_spoken_event_id.map(str::to_string),
            last_update: unix_now(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&state)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;

        debug!(
            "Persisted runtime state: match_id={:?}, last_spoken={:?}",
            state.match_id, state.last_spoken_event_id
        );
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
