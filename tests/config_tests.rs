//! Tests for configuration loading and environment overrides.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;
use turnstream::config::EngineConfig;
use turnstream::error::EngineError;
use turnstream::types::SubscriptionTier;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 11] = [
    "TURNSTREAM_ENDPOINT",
    "TURNSTREAM_API_KEY",
    "TURNSTREAM_LOCALE",
    "TURNSTREAM_TIER",
    "TURNSTREAM_SEND_THROTTLE_MS",
    "TURNSTREAM_MAX_INPUT_LENGTH",
    "TURNSTREAM_STREAM_THROTTLE_MS",
    "TURNSTREAM_HISTORY_WINDOW",
    "TURNSTREAM_MAX_ATTEMPTS",
    "TURNSTREAM_ATTEMPT_TIMEOUT_MS",
    "TURNSTREAM_RETRY_DELAY_MS",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clean_env() -> (std::sync::MutexGuard<'static, ()>, EnvGuard) {
    let lock = env_lock_guard();
    let guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
    (lock, guard)
}

#[test]
fn defaults_match_documented_values() {
    let config = EngineConfig::default();
    assert_eq!(config.endpoint, "http://localhost:8787/api/chat");
    assert_eq!(config.locale, "en");
    assert_eq!(config.tier, SubscriptionTier::Free);
    assert_eq!(config.send_throttle(), Duration::from_millis(1_000));
    assert_eq!(config.max_input_length, 2_000);
    assert_eq!(config.stream_throttle(), Duration::from_millis(80));
    assert_eq!(config.history_window, 10);
    assert_eq!(config.max_attempts, 2);
    assert_eq!(config.attempt_timeout(), Duration::from_secs(45));
    assert_eq!(config.retry_delay(), Duration::ZERO);
    assert!(config.api_key.is_none());
}

#[test]
fn load_reads_file_then_env() {
    let (_lock, _guard) = clean_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
endpoint = "https://file.example/chat"
tier = "premium"
history_window = 6
"#,
    )
    .unwrap();

    std::env::set_var("TURNSTREAM_HISTORY_WINDOW", "4");
    std::env::set_var("TURNSTREAM_API_KEY", "env-key");

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.endpoint, "https://file.example/chat");
    assert_eq!(config.tier, SubscriptionTier::Premium);
    assert_eq!(config.history_window, 4);
    assert_eq!(config.api_key.as_deref(), Some("env-key"));
}

#[test]
fn blank_env_values_are_ignored() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("TURNSTREAM_LOCALE", "   ");

    let mut config = EngineConfig::default();
    config.apply_env().unwrap();
    assert_eq!(config.locale, "en");
}

#[test]
fn invalid_env_value_is_reported_by_name() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("TURNSTREAM_MAX_ATTEMPTS", "lots");

    let mut config = EngineConfig::default();
    let err = config.apply_env().unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(err.to_string().contains("TURNSTREAM_MAX_ATTEMPTS"));
}

#[test]
fn env_tier_parses_lowercase_name() {
    let (_lock, _guard) = clean_env();
    std::env::set_var("TURNSTREAM_TIER", "plus");

    let mut config = EngineConfig::default();
    config.apply_env().unwrap();
    assert_eq!(config.tier, SubscriptionTier::Plus);
    assert_eq!(config.tier.daily_limit(), 100);
}

#[test]
fn missing_file_is_an_io_error() {
    let (_lock, _guard) = clean_env();
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Io(_)));
}

#[test]
fn zero_history_window_fails_validation() {
    let config = EngineConfig {
        history_window: 0,
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn config_round_trips_through_toml() {
    let config = EngineConfig {
        api_key: Some("k".into()),
        tier: SubscriptionTier::Plus,
        ..EngineConfig::default()
    };
    let text = toml::to_string(&config).unwrap();
    assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
}

#[test]
fn default_path_points_at_config_toml() {
    if let Some(path) = EngineConfig::default_path() {
        assert!(path.ends_with("config.toml"));
        assert!(path.to_string_lossy().contains("turnstream"));
    }
}
