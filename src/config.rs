//! Configuration loading and persistence.
//!
//! Reads `config.json` from the topical config directory, then applies
//! environment variable overrides. Missing or unreadable files fall back to
//! defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_RECONNECT_DELAY, DEFAULT_URL, ENV_CONFIG_DIR,
    ENV_RECONNECT_DELAY_MS, ENV_URL,
};
use crate::reconnect::FixedDelay;

/// Configuration for a topical session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket URL of the server (`http(s)://` is accepted and converted).
    pub url: String,
    /// Delay in milliseconds between a disconnect and the next attempt.
    pub reconnect_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `TOPICAL_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/topical`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("topical"))
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_dir() {
            Ok(dir) => Self::load_from(&dir).unwrap_or_else(|e| {
                log::debug!("Using default config: {e:#}");
                Self::default()
            }),
            Err(e) => {
                log::warn!("{e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir` without applying overrides.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Persists the configuration to `dir`, creating it if necessary.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_URL) {
            self.url = url;
        }

        if let Some(delay) = lookup(ENV_RECONNECT_DELAY_MS) {
            match delay.parse::<u64>() {
                Ok(ms) => self.reconnect_delay_ms = ms,
                Err(e) => log::warn!("Ignoring {ENV_RECONNECT_DELAY_MS}={delay:?}: {e}"),
            }
        }
    }

    /// Reconnect delay as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// The fixed-delay reconnect policy this configuration describes.
    #[must_use]
    pub fn reconnect_policy(&self) -> FixedDelay {
        FixedDelay(self.reconnect_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.url, "ws://localhost:8000/socket");
        assert_eq!(config.reconnect_delay_ms, 500);
        assert_eq!(config.reconnect_policy(), FixedDelay(Duration::from_millis(500)));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            url: "wss://example.com/socket".to_string(),
            reconnect_delay_ms: 250,
        };
        config.save_to(dir.path()).unwrap();
        assert_eq!(Config::load_from(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{"url":"ws://other/socket"}"#).unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.url, "ws://other/socket");
        assert_eq!(config.reconnect_delay_ms, 500);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_URL, "ws://override/socket"),
            (ENV_RECONNECT_DELAY_MS, "1500"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.url, "ws://override/socket");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_delay_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == ENV_RECONNECT_DELAY_MS).then(|| "soon".to_string()));
        assert_eq!(config.reconnect_delay_ms, 500);
    }
}
