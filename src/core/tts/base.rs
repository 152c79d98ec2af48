//! TTS provider seam
//!
//! The engine treats the TTS service as a black box that turns
//! (text, excitement) into a stream of PCM chunks. `SpeechSynthesizer` is
//! the seam: the production implementation streams from ElevenLabs, tests
//! plug in stubs.

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::audio::SpeechBuffer;

/// TTS-specific error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Provider error ({status}): {body}")]
    ProviderError { status: u16, body: String },

    #[error("No audio within the synthesis deadline")]
    Timeout,
}

/// Result type for TTS operations
pub type TtsResult<T> = Result<T, TtsError>;

/// Configuration for the TTS provider
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub base_url: String,
    pub sample_rate: u32,
    /// Hard deadline from request start to the first PCM byte.
    pub timeout: std::time::Duration,
}

impl TtsConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            api_key: config.elevenlabs_api_key.clone(),
            voice_id: config.elevenlabs_voice_id.clone(),
            model_id: config.tts_model_id.clone(),
            base_url: config.tts_base_url.clone(),
            sample_rate: config.sample_rate,
            timeout: config.tts_timeout,
        }
    }
}

/// Voice settings sent with each synthesis request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub speed: f32,
    pub use_speaker_boost: bool,
}

impl VoiceSettings {
    /// Map excitement (0-10) onto delivery. Three tiers; higher excitement
    /// trades stability for style and pace, monotonically.
    pub fn for_excitement(excitement: u8) -> Self {
        let (stability, style, speed) = if excitement <= 2 {
            (0.50, 0.70, 0.90)
        } else if excitement <= 5 {
            (0.30, 0.90, 0.95)
        } else {
            (0.15, 0.90, 1.00)
        };

        Self {
            stability,
            similarity_boost: 0.9,
            style,
            speed,
            use_speaker_boost: true,
        }
    }
}

/// A streaming text-to-speech backend.
///
/// Implementations append decoded mono samples to `buffer` as they arrive
/// and MUST close the buffer before returning: `finish()` when any audio
/// was delivered (even truncated), `fail()` when none was. The mixer keys
/// its duck/skip behavior off that distinction.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        excitement: u8,
        buffer: SpeechBuffer,
        cancel: CancellationToken,
    ) -> TtsResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_settings_tiers() {
        let calm = VoiceSettings::for_excitement(2);
        assert_eq!(calm.stability, 0.50);
        assert_eq!(calm.speed, 0.90);

        let medium = VoiceSettings::for_excitement(5);
        assert_eq!(medium.stability, 0.30);
        assert_eq!(medium.style, 0.90);

        let excited = VoiceSettings::for_excitement(10);
        assert_eq!(excited.stability, 0.15);
        assert_eq!(excited.speed, 1.00);
    }

    #[test]
    fn test_voice_settings_monotonic_in_excitement() {
        let mut previous = VoiceSettings::for_excitement(0);
        for excitement in 1..=10 {
            let settings = VoiceSettings::for_excitement(excitement);
            assert!(settings.stability <= previous.stability);
            assert!(settings.speed >= previous.speed);
            previous = settings;
        }
    }
}
