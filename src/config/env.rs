use std::env;
use std::path::PathBuf;
use std::time::Duration;

use super::utils::parse_bool;
use super::validation::{self, ConfigError};
use super::EngineConfig;

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Reads configuration from environment variables, with sensible
    /// defaults. Also loads from a `.env` file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Numeric environment variables are malformed
    /// - Gain / ramp settings are structurally invalid
    /// - The TTS API key is missing
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let api_base_url =
            env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let ws_auth_token = env::var("WS_AUTH_TOKEN").ok().filter(|v| !v.is_empty());
        let match_id = env::var("MATCH_ID").ok().filter(|v| !v.is_empty());
        let api_timeout = Duration::from_secs(parse_env_u64("API_TIMEOUT_SECONDS", 10)?);
        let match_poll_interval =
            Duration::from_secs(parse_env_u64("MATCH_POLL_INTERVAL_SECONDS", 30)?);

        let elevenlabs_api_key = env::var("ELEVENLABS_API_KEY").unwrap_or_default();
        let elevenlabs_voice_id =
            env::var("ELEVENLABS_VOICE_ID").unwrap_or_else(|_| "PSk5GhCjavRcRMo6NtjK".to_string());
        let tts_model_id =
            env::var("TTS_MODEL_ID").unwrap_or_else(|_| "eleven_multilingual_v2".to_string());
        let tts_base_url =
            env::var("TTS_BASE_URL").unwrap_or_else(|_| "https://api.elevenlabs.io".to_string());
        let tts_timeout = Duration::from_secs(parse_env_u64("TTS_TIMEOUT_SECONDS", 8)?);

        let sample_rate = parse_env_u64("SAMPLE_RATE", 22050)? as u32;
        let nominal_ambience_gain = parse_env_f32("NOMINAL_AMBIENCE_GAIN", 0.30)?;
        let ducked_ambience_gain = parse_env_f32("DUCKED_AMBIENCE_GAIN", 0.08)?;
        let duck_ramp_ms = parse_env_u64("DUCK_RAMP_MS", 200)? as u32;
        let ambience_path = env::var("AMBIENCE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("background_audio/crowd_22050.wav"));

        let state_path = env::var("STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("state/runtime_state.json"));
        let audio_history_dir = env::var("AUDIO_HISTORY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("audio_history"));
        let save_audio = env::var("SAVE_AUDIO")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);

        let reconnect_initial =
            Duration::from_millis(parse_env_u64("RECONNECT_INITIAL_MS", 1000)?);
        let reconnect_max = Duration::from_millis(parse_env_u64("RECONNECT_MAX_MS", 30000)?);

        let config = EngineConfig {
            api_base_url,
            ws_auth_token,
            match_id,
            api_timeout,
            match_poll_interval,
            elevenlabs_api_key,
            elevenlabs_voice_id,
            tts_model_id,
            tts_base_url,
            tts_timeout,
            sample_rate,
            nominal_ambience_gain,
            ducked_ambience_gain,
            duck_ramp_ms,
            ambience_path,
            state_path,
            audio_history_dir,
            save_audio,
            reconnect_initial,
            reconnect_max,
        };

        validation::validate(&config)?;

        Ok(config)
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid(format!("{name} is not a valid integer: {e}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_f32(name: &str, default: f32) -> Result<f32, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<f32>()
            .map_err(|e| ConfigError::Invalid(format!("{name} is not a valid number: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Helper to clean up environment variables after tests
    fn cleanup_env_vars() {
        for name in [
            "API_BASE_URL",
            "WS_AUTH_TOKEN",
            "MATCH_ID",
            "ELEVENLABS_API_KEY",
            "ELEVENLABS_VOICE_ID",
            "TTS_TIMEOUT_SECONDS",
            "SAMPLE_RATE",
            "NOMINAL_AMBIENCE_GAIN",
            "DUCKED_AMBIENCE_GAIN",
            "DUCK_RAMP_MS",
            "SAVE_AUDIO",
            "RECONNECT_INITIAL_MS",
            "RECONNECT_MAX_MS",
        ] {
            unsafe {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("ELEVENLABS_API_KEY", "test-key");
        }

        let config = EngineConfig::from_env().expect("Should load config");
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.tts_timeout, Duration::from_secs(8));
        assert_eq!(config.nominal_ambience_gain, 0.30);
        assert_eq!(config.ducked_ambience_gain, 0.08);
        assert_eq!(config.duck_ramp_ms, 200);
        assert!(config.save_audio);
        assert_eq!(config.reconnect_initial, Duration::from_millis(1000));
        assert_eq!(config.reconnect_max, Duration::from_millis(30000));
        assert!(config.match_id.is_none());
        assert!(config.ws_auth_token.is_none());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key() {
        cleanup_env_vars();

        let result = EngineConfig::from_env();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("ELEVENLABS_API_KEY"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("ELEVENLABS_API_KEY", "test-key");
            env::set_var("API_BASE_URL", "https://live.example.com");
            env::set_var("MATCH_ID", "m-7");
            env::set_var("TTS_TIMEOUT_SECONDS", "4");
            env::set_var("SAVE_AUDIO", "false");
        }

        let config = EngineConfig::from_env().expect("Should load config");
        assert_eq!(config.api_base_url, "https://live.example.com");
        assert_eq!(config.match_id, Some("m-7".to_string()));
        assert_eq!(config.tts_timeout, Duration::from_secs(4));
        assert!(!config.save_audio);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_malformed_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("ELEVENLABS_API_KEY", "test-key");
            env::set_var("SAMPLE_RATE", "not-a-number");
        }

        let result = EngineConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("SAMPLE_RATE"));

        cleanup_env_vars();
    }
}
