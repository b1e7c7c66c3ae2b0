//! Configuration file management for `instance-iterator-tool`.
//!
//! Provides a TOML-based config file at
//! `~/.config/instance-iterator-tool/config.toml` and a resolution chain:
//! CLI flag > env var > config file > default, matching the reference
//! orchestrator's own CLI config layering.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use broker_core::types::{CanarySelectionParams, OperationType};
use broker_core::ConfigError;
use serde::{Deserialize, Serialize};

use crate::Cli;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub iterator: IteratorSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BrokerSection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IteratorSection {
    pub max_in_flight: Option<usize>,
    pub canaries: Option<usize>,
    pub canary_selection_params: Option<BTreeMap<String, String>>,
    pub polling_interval_secs: Option<u64>,
    pub attempt_interval_secs: Option<u64>,
    pub attempt_limit: Option<usize>,
    pub operation_type: Option<String>,
}

/// Return the tool's config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/instance-iterator-tool` or
/// `~/.config/instance-iterator-tool`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("instance-iterator-tool");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("instance-iterator-tool")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file, if one exists. Absence is not an
/// error: every field it would supply has a CLI/env/default fallback.
pub fn load_config() -> Option<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&contents) {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unparsable config file");
            None
        }
    }
}

/// Identity of the broker management API to talk to.
#[derive(Debug, Clone)]
pub struct BrokerIdentity {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Fully resolved iterator tuning parameters.
#[derive(Debug, Clone)]
pub struct IteratorSettings {
    pub max_in_flight: usize,
    pub canaries: usize,
    pub canary_selection_params: CanarySelectionParams,
    pub polling_interval: Duration,
    pub attempt_interval: Duration,
    pub attempt_limit: usize,
    pub operation_type: OperationType,
}

/// Resolve broker identity and iterator settings using the chain: CLI flag
/// > env var > config file > default.
///
/// Env var lookups for the broker identity fields are handled by `clap`
/// itself (`env = "BROKER_URL"` and friends on [`Cli`]); this function only
/// has to fall back further to the config file.
pub fn resolve(cli: &Cli) -> Result<(BrokerIdentity, IteratorSettings), ConfigError> {
    let file = load_config();

    let url = cli
        .broker_url
        .clone()
        .or_else(|| file.as_ref().and_then(|f| f.broker.url.clone()));
    let username = cli
        .broker_username
        .clone()
        .or_else(|| file.as_ref().and_then(|f| f.broker.username.clone()));
    let password = cli
        .broker_password
        .clone()
        .or_else(|| file.as_ref().and_then(|f| f.broker.password.clone()));

    let (url, username, password) = match (url, username, password) {
        (Some(url), Some(username), Some(password))
            if !url.trim().is_empty() && !username.trim().is_empty() && !password.trim().is_empty() =>
        {
            (url, username, password)
        }
        _ => return Err(ConfigError::MissingBrokerIdentity),
    };

    let iterator_section = file.map(|f| f.iterator).unwrap_or_default();

    let max_in_flight = cli
        .max_in_flight
        .or(iterator_section.max_in_flight)
        .unwrap_or(1);
    let canaries = cli.canaries.or(iterator_section.canaries).unwrap_or(0);
    let canary_selection_params = if !cli.canary_selection_params.is_empty() {
        cli.canary_selection_params.iter().cloned().collect()
    } else {
        iterator_section.canary_selection_params.unwrap_or_default()
    };
    let polling_interval_secs = cli
        .polling_interval_secs
        .or(iterator_section.polling_interval_secs)
        .unwrap_or(10);
    let attempt_interval_secs = cli
        .attempt_interval_secs
        .or(iterator_section.attempt_interval_secs)
        .unwrap_or(60);
    let attempt_limit = cli.attempt_limit.or(iterator_section.attempt_limit).unwrap_or(1);
    let operation_type = cli
        .operation_type
        .map(OperationType::from)
        .unwrap_or(OperationType::Upgrade);

    if max_in_flight < 1 {
        return Err(ConfigError::MaxInFlightTooLow(max_in_flight));
    }
    if attempt_limit < 1 {
        return Err(ConfigError::AttemptLimitTooLow(attempt_limit));
    }
    if polling_interval_secs == 0 {
        return Err(ConfigError::PollingIntervalZero);
    }
    if attempt_interval_secs == 0 {
        return Err(ConfigError::AttemptIntervalZero);
    }

    Ok((
        BrokerIdentity { url, username, password },
        IteratorSettings {
            max_in_flight,
            canaries,
            canary_selection_params,
            polling_interval: Duration::from_secs(polling_interval_secs),
            attempt_interval: Duration::from_secs(attempt_interval_secs),
            attempt_limit,
            operation_type,
        },
    ))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use clap::Parser;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn cli_with(args: &[&str]) -> Cli {
        let mut full = vec!["instance-iterator-tool"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn resolve_fails_without_any_broker_identity() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("BROKER_URL") };
        unsafe { std::env::remove_var("BROKER_USERNAME") };
        unsafe { std::env::remove_var("BROKER_PASSWORD") };

        let cli = cli_with(&[]);
        let err = resolve(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBrokerIdentity));
    }

    #[test]
    fn resolve_accepts_cli_flags() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("BROKER_URL") };
        unsafe { std::env::remove_var("BROKER_USERNAME") };
        unsafe { std::env::remove_var("BROKER_PASSWORD") };

        let cli = cli_with(&[
            "--broker-url",
            "https://broker.example.com",
            "--broker-username",
            "admin",
            "--broker-password",
            "secret",
        ]);
        let (identity, settings) = resolve(&cli).unwrap();
        assert_eq!(identity.url, "https://broker.example.com");
        assert_eq!(settings.max_in_flight, 1);
        assert_eq!(settings.attempt_limit, 1);
    }

    #[test]
    fn resolve_rejects_zero_max_in_flight() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("BROKER_URL") };
        unsafe { std::env::remove_var("BROKER_USERNAME") };
        unsafe { std::env::remove_var("BROKER_PASSWORD") };

        let cli = cli_with(&[
            "--broker-url",
            "https://broker.example.com",
            "--broker-username",
            "admin",
            "--broker-password",
            "secret",
            "--max-in-flight",
            "0",
        ]);
        let err = resolve(&cli).unwrap_err();
        assert!(matches!(err, ConfigError::MaxInFlightTooLow(0)));
    }

    #[test]
    fn save_then_load_config_round_trips() {
        let _lock = lock_env();
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", dir.path()) };

        let mut config = ConfigFile::default();
        config.broker.url = Some("https://broker.example.com".to_string());
        config.iterator.max_in_flight = Some(5);
        save_config(&config).unwrap();

        let loaded = load_config().expect("config file should have been written");
        assert_eq!(loaded.broker.url.as_deref(), Some("https://broker.example.com"));
        assert_eq!(loaded.iterator.max_in_flight, Some(5));

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("instance-iterator-tool/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
