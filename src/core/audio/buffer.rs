//! Shared speech buffer
//!
//! Hand-off point between a TTS fetch task (producer) and the realtime
//! mixer callback (consumer). The producer appends decoded samples as they
//! arrive off the wire; the consumer drains up to a block's worth per tick.
//! Both sides hold the lock only long enough to copy, which keeps the
//! callback's critical section short.

use std::sync::Arc;

use parking_lot::Mutex;

/// Consumer-visible snapshot of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    /// Samples appended but not yet drained.
    pub available: usize,
    /// Producer finished; what has arrived is all there is.
    pub closed: bool,
    /// Producer failed before delivering a single sample.
    pub failed: bool,
}

struct BufferState {
    samples: Vec<f32>,
    read_pos: usize,
    closed: bool,
    failed: bool,
}

/// Growable mono PCM buffer shared between one producer and one consumer.
#[derive(Clone)]
pub struct SpeechBuffer {
    state: Arc<Mutex<BufferState>>,
}

impl SpeechBuffer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState {
                samples: Vec::new(),
                read_pos: 0,
                closed: false,
                failed: false,
            })),
        }
    }

    /// Append decoded samples. No-op after `finish`/`fail`.
    pub fn append(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        if !state.closed && !state.failed {
            state.samples.extend_from_slice(samples);
        }
    }

    /// Mark the stream complete: remaining samples play out, then the
    /// consumer treats the buffer as drained.
    pub fn finish(&self) {
        self.state.lock().closed = true;
    }

    /// Mark the fetch failed before any sample arrived. The consumer clears
    /// the slot without ever ducking.
    pub fn fail(&self) {
        let mut state = self.state.lock();
        // A fetch that already delivered audio cannot retroactively fail;
        // the truncation point is the last decoded sample.
        if state.samples.is_empty() {
            state.failed = true;
        }
        state.closed = true;
    }

    /// Copy up to `dst.len()` samples into `dst`, advancing the read
    /// cursor. Returns the number of samples written.
    pub fn drain(&self, dst: &mut [f32]) -> usize {
        let mut state = self.state.lock();
        let available = state.samples.len() - state.read_pos;
        let n = available.min(dst.len());
        let start = state.read_pos;
        dst[..n].copy_from_slice(&state.samples[start..start + n]);
        state.read_pos += n;
        n
    }

    pub fn status(&self) -> BufferStatus {
        let state = self.state.lock();
        BufferStatus {
            available: state.samples.len() - state.read_pos,
            closed: state.closed,
            failed: state.failed,
        }
    }
}

impl Default for SpeechBuffer {
    fn default() -> Self {
        Self::new()
    }
}
