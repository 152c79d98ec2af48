//! Streaming text-to-speech.

pub mod base;
pub mod elevenlabs;

pub use base::{SpeechSynthesizer, TtsConfig, TtsError, TtsResult, VoiceSettings};
pub use elevenlabs::ElevenLabsTts;
