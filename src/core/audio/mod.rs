//! Audio subsystem: ambience loop, ducking, block mixer, device engine,
//! and the best-effort history sink.

pub mod ambience;
pub mod buffer;
pub mod ducking;
pub mod engine;
pub mod history;
pub mod mixer;

pub use ambience::{AmbienceError, AmbienceLoop};
pub use buffer::SpeechBuffer;
pub use ducking::DuckingController;
pub use engine::{AudioEngine, AudioError, AudioResult};
pub use history::{HistoryJob, HistorySink};
pub use mixer::{MixerCore, PlaybackEnd, PlaybackOutcome, TtsSubmission};
