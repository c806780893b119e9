use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the care backend (negotiation, instruction feed, alerts).
    pub backend_url: String,
    pub voice: Option<String>,
    pub feed_poll_interval: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let backend_url = std::env::var("SOLACE_BACKEND_URL")
            .map_err(|_| ConfigError::MissingVar("SOLACE_BACKEND_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let voice = std::env::var("SOLACE_VOICE").ok();

        let poll_secs_str =
            std::env::var("SOLACE_FEED_POLL_SECS").unwrap_or_else(|_| "5".to_string());
        let poll_secs = poll_secs_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "SOLACE_FEED_POLL_SECS".to_string(),
                format!("'{}' is not a number of seconds", poll_secs_str),
            )
        })?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "SOLACE_FEED_POLL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            backend_url,
            voice,
            feed_poll_interval: Duration::from_secs(poll_secs),
            log_level,
        })
    }

    pub fn negotiation_url(&self) -> String {
        format!("{}/realtime/negotiate", self.backend_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("SOLACE_BACKEND_URL");
            env::remove_var("SOLACE_VOICE");
            env::remove_var("SOLACE_FEED_POLL_SECS");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        unsafe {
            env::set_var("SOLACE_BACKEND_URL", "https://care.example.com/");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.backend_url, "https://care.example.com");
        assert_eq!(
            config.negotiation_url(),
            "https://care.example.com/realtime/negotiate"
        );
        assert_eq!(config.voice, None);
        assert_eq!(config.feed_poll_interval, Duration::from_secs(5));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("SOLACE_BACKEND_URL", "http://localhost:3000");
            env::set_var("SOLACE_VOICE", "shimmer");
            env::set_var("SOLACE_FEED_POLL_SECS", "12");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.backend_url, "http://localhost:3000");
        assert_eq!(config.voice, Some("shimmer".to_string()));
        assert_eq!(config.feed_poll_interval, Duration::from_secs(12));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_backend_url() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "SOLACE_BACKEND_URL"),
            _ => panic!("Expected MissingVar for SOLACE_BACKEND_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_poll_interval() {
        clear_env_vars();
        unsafe {
            env::set_var("SOLACE_BACKEND_URL", "http://localhost:3000");
            env::set_var("SOLACE_FEED_POLL_SECS", "soon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SOLACE_FEED_POLL_SECS"),
            _ => panic!("Expected InvalidValue for SOLACE_FEED_POLL_SECS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_zero_poll_interval_rejected() {
        clear_env_vars();
        unsafe {
            env::set_var("SOLACE_BACKEND_URL", "http://localhost:3000");
            env::set_var("SOLACE_FEED_POLL_SECS", "0");
        }

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("SOLACE_BACKEND_URL", "http://localhost:3000");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
