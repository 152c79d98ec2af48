//! Configuration module for the wicketcast engine
//!
//! Configuration is environment-driven: values come from actual environment
//! variables, with a `.env` file (if present) loaded first and defaults
//! applied last. Validation runs after loading so a structurally invalid
//! configuration fails before any subsystem starts.
//!
//! # Modules
//! - `env`: environment variable loading
//! - `validation`: configuration validation logic
//! - `utils`: parsing helpers

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod utils;
mod validation;

pub use validation::ConfigError;

/// Engine configuration
///
/// Contains everything needed to run one commentary process:
/// - upstream API / push-channel settings
/// - TTS provider settings
/// - audio output and ducking levels
/// - durable state and audio-history paths
/// - reconnect policy
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Upstream API
    pub api_base_url: String,
    pub ws_auth_token: Option<String>,
    /// Fixed match subscription. When unset the booking endpoint is used to
    /// discover the current match at startup.
    pub match_id: Option<String>,
    pub api_timeout: Duration,
    pub match_poll_interval: Duration,

    // TTS provider
    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_id: String,
    pub tts_model_id: String,
    pub tts_base_url: String,
    pub tts_timeout: Duration,

    // Audio
    pub sample_rate: u32,
    pub nominal_ambience_gain: f32,
    pub ducked_ambience_gain: f32,
    pub duck_ramp_ms: u32,
    pub ambience_path: PathBuf,

    // Durable state and history
    pub state_path: PathBuf,
    pub audio_history_dir: PathBuf,
    pub save_audio: bool,

    // Reconnect policy
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl EngineConfig {
    /// WebSocket URL for the live-commentary push channel of a match.
    ///
    /// Derived from `api_base_url` by swapping the scheme, the way the
    /// upstream publisher expects.
    pub fn ws_url(&self, match_id: &str) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/ws/live-commentary/{match_id}")
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A fully populated configuration for unit tests.
    pub fn test_config() -> EngineConfig {
        EngineConfig {
            api_base_url: "http://localhost:8000".to_string(),
            ws_auth_token: None,
            match_id: None,
            api_timeout: Duration::from_secs(10),
            match_poll_interval: Duration::from_secs(30),
            elevenlabs_api_key: "test-key".to_string(),
            elevenlabs_voice_id: "test-voice".to_string(),
            tts_model_id: "eleven_multilingual_v2".to_string(),
            tts_base_url: "https://api.elevenlabs.io".to_string(),
            tts_timeout: Duration::from_secs(8),
            sample_rate: 22050,
            nominal_ambience_gain: 0.30,
            ducked_ambience_gain: 0.08,
            duck_ramp_ms: 200,
            ambience_path: PathBuf::from("background_audio/crowd_22050.wav"),
            state_path: PathBuf::from("state/runtime_state.json"),
            audio_history_dir: PathBuf::from("audio_history"),
            save_audio: true,
            reconnect_initial: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(30000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_config;

    #[test]
    fn test_ws_url_http() {
        let config = test_config();
        assert_eq!(
            config.ws_url("m-42"),
            "ws://localhost:8000/ws/live-commentary/m-42"
        );
    }

    #[test]
    fn test_ws_url_https_and_trailing_slash() {
        let mut config = test_config();
        config.api_base_url = "https://api.example.com/".to_string();
        assert_eq!(
            config.ws_url("m-42"),
            "wss://api.example.com/ws/live-commentary/m-42"
        );
    }
}
