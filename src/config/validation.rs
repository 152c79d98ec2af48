use thiserror::Error;

use super::EngineConfig;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Validate a loaded configuration.
///
/// A failure here is fatal: the process exits with code 1 before the queue
/// starts consuming.
pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.elevenlabs_api_key.is_empty() {
        return Err(ConfigError::Invalid(
            "ELEVENLABS_API_KEY is required".to_string(),
        ));
    }

    if config.api_base_url.is_empty() {
        return Err(ConfigError::Invalid(
            "API_BASE_URL must not be empty".to_string(),
        ));
    }

    if config.sample_rate == 0 {
        return Err(ConfigError::Invalid(
            "SAMPLE_RATE must be greater than zero".to_string(),
        ));
    }

    for (name, value) in [
        ("NOMINAL_AMBIENCE_GAIN", config.nominal_ambience_gain),
        ("DUCKED_AMBIENCE_GAIN", config.ducked_ambience_gain),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Invalid(format!(
                "{name} must be within [0.0, 1.0], got {value}"
            )));
        }
    }

    if config.ducked_ambience_gain >= config.nominal_ambience_gain {
        return Err(ConfigError::Invalid(format!(
            "DUCKED_AMBIENCE_GAIN ({}) must be below NOMINAL_AMBIENCE_GAIN ({})",
            config.ducked_ambience_gain, config.nominal_ambience_gain
        )));
    }

    if config.duck_ramp_ms == 0 {
        return Err(ConfigError::Invalid(
            "DUCK_RAMP_MS must be greater than zero".to_string(),
        ));
    }

    if config.reconnect_initial.is_zero()
        || config.reconnect_max < config.reconnect_initial
    {
        return Err(ConfigError::Invalid(
            "RECONNECT_INITIAL_MS must be non-zero and no greater than RECONNECT_MAX_MS"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_config;

    #[test]
    fn test_validate_ok() {
        assert!(validate(&test_config()).is_ok());
    }

    #[test]
    fn test_validate_missing_api_key() {
        let mut config = test_config();
        config.elevenlabs_api_key = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ELEVENLABS_API_KEY"));
    }

    #[test]
    fn test_validate_gain_out_of_range() {
        let mut config = test_config();
        config.nominal_ambience_gain = 1.4;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_ducked_above_nominal() {
        let mut config = test_config();
        config.ducked_ambience_gain = 0.5;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("DUCKED_AMBIENCE_GAIN"));
    }

    #[test]
    fn test_validate_reconnect_window() {
        let mut config = test_config();
        config.reconnect_max = std::time::Duration::from_millis(10);
        assert!(validate(&config).is_err());
    }
}
