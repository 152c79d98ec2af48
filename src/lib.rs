pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use self::config::EngineConfig;
pub use self::core::api::ApiClient;
pub use self::core::audio::{AmbienceLoop, AudioEngine, DuckingController, MixerCore};
pub use self::core::checkpoint::CheckpointStore;
pub use self::core::event::Event;
pub use self::core::orchestrator::Orchestrator;
pub use self::core::queue::{AdmitOutcome, EventQueue};
pub use self::core::stream::{StreamClient, StreamStatus};
pub use self::core::tts::{ElevenLabsTts, SpeechSynthesizer};
