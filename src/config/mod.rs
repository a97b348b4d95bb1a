//! Configuration system (layered: defaults < TOML file < env).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::SubscriptionTier;

/// Engine configuration.
///
/// Every field has a default so a partial TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Generation endpoint receiving the POSTed payload.
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Locale for user-visible error strings.
    pub locale: String,
    pub tier: SubscriptionTier,
    /// Minimum gap between two accepted sends.
    pub send_throttle_ms: u64,
    /// Input ceiling, in characters.
    pub max_input_length: usize,
    /// Minimum gap between two observer flushes while streaming.
    pub stream_throttle_ms: u64,
    /// Number of trailing messages sent as history.
    pub history_window: usize,
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8787/api/chat".to_string(),
            api_key: None,
            locale: "en".to_string(),
            tier: SubscriptionTier::Free,
            send_throttle_ms: 1_000,
            max_input_length: 2_000,
            stream_throttle_ms: 80,
            history_window: 10,
            max_attempts: 2,
            attempt_timeout_ms: 45_000,
            retry_delay_ms: 0,
        }
    }
}

const ENV_PREFIX: &str = "TURNSTREAM_";

impl EngineConfig {
    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| EngineError::Configuration(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the default config file if it exists, then env.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = match Self::default_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Platform config location, e.g. `~/.config/turnstream/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "turnstream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay `TURNSTREAM_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = env_var("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = env_var("LOCALE") {
            self.locale = v;
        }
        if let Some(v) = env_var("TIER") {
            self.tier = parse_env("TIER", &v)?;
        }
        if let Some(v) = env_var("SEND_THROTTLE_MS") {
            self.send_throttle_ms = parse_env("SEND_THROTTLE_MS", &v)?;
        }
        if let Some(v) = env_var("MAX_INPUT_LENGTH") {
            self.max_input_length = parse_env("MAX_INPUT_LENGTH", &v)?;
        }
        if let Some(v) = env_var("STREAM_THROTTLE_MS") {
            self.stream_throttle_ms = parse_env("STREAM_THROTTLE_MS", &v)?;
        }
        if let Some(v) = env_var("HISTORY_WINDOW") {
            self.history_window = parse_env("HISTORY_WINDOW", &v)?;
        }
        if let Some(v) = env_var("MAX_ATTEMPTS") {
            self.max_attempts = parse_env("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = env_var("ATTEMPT_TIMEOUT_MS") {
            self.attempt_timeout_ms = parse_env("ATTEMPT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = env_var("RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_env("RETRY_DELAY_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.history_window == 0 {
            return Err(EngineError::Configuration(
                "history_window must be at least 1".into(),
            ));
        }
        if self.max_input_length == 0 {
            return Err(EngineError::Configuration(
                "max_input_length must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn send_throttle(&self) -> Duration {
        Duration::from_millis(self.send_throttle_ms)
    }

    pub fn stream_throttle(&self) -> Duration {
        Duration::from_millis(self.stream_throttle_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(suffix: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        EngineError::Configuration(format!("invalid value for {ENV_PREFIX}{suffix}: {value:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            endpoint = "https://api.example.test/chat"
            tier = "plus"
            stream_throttle_ms = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "https://api.example.test/chat");
        assert_eq!(config.tier, SubscriptionTier::Plus);
        assert_eq!(config.stream_throttle(), Duration::from_millis(200));
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.history_window, 10);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = EngineConfig::from_toml_str("max_attempts = 0").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = EngineConfig::from_toml_str("max_attempts = \"two\"").unwrap_err();
        assert!(err.to_string().contains("invalid config file"));
    }
}
