//! Database configuration via `kipu.toml`
//!
//! On first open, a default `kipu.toml` is created in the data directory.
//! To change settings, edit the file and reopen the database.

use super::retry::RetryConfig;
use kipu_core::error::{Error, Result};
use kipu_durability::DurabilityMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the database data directory.
pub const CONFIG_FILE_NAME: &str = "kipu.toml";

/// Database configuration loaded from `kipu.toml`.
///
/// # Example
///
/// ```toml
/// # "always" = fsync every commit, a returned write is durable
/// # "standard" = periodic fsync (~100ms), may lose last interval on crash
/// durability = "always"
/// max_retries = 5
/// retry_base_delay_ms = 1
/// retry_max_delay_ms = 50
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KipuConfig {
    /// Durability mode: `"always"` or `"standard"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Retries of a conflicting update before the conflict is surfaced.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// First backoff delay between update retries, doubled per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_durability_str() -> String {
    "always".to_string()
}

fn default_max_retries() -> usize {
    RetryConfig::default().max_retries
}

fn default_base_delay_ms() -> u64 {
    RetryConfig::default().base_delay_ms
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::default().max_delay_ms
}

impl Default for KipuConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl KipuConfig {
    /// Parse the durability string into a `DurabilityMode`.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        self.durability.parse()
    }

    /// Retry policy for updates
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(self.max_retries)
            .with_base_delay_ms(self.retry_base_delay_ms)
            .with_max_delay_ms(self.retry_max_delay_ms)
    }

    /// Reject settings that parse but make no sense together
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# KipuDB configuration
#
# Durability mode: "always" (default) or "standard"
#   "always"   = fsync every commit, a write that returned is durable
#   "standard" = periodic fsync (~100ms), may lose last interval on crash
durability = "always"

# Update retries on revision conflict (default: 5)
max_retries = 5

# Exponential backoff between retries, in milliseconds
retry_base_delay_ms = 1
retry_max_delay_ms = 50
"#
    }

    /// Load `kipu.toml`; keys left out of the file take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bad = |what: &str, e: &dyn std::fmt::Display| {
            Error::InvalidConfig(format!("cannot {} {}: {}", what, path.display(), e))
        };
        let text = std::fs::read_to_string(path).map_err(|e| bad("read", &e))?;
        let config: KipuConfig = toml::from_str(&text).map_err(|e| bad("parse", &e))?;
        config.validate()?;
        Ok(config)
    }

    /// Seed a fresh data directory with the commented default file
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        std::fs::write(path, Self::default_toml())?;
        Ok(())
    }

    /// Persist an explicitly supplied config next to the data
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::SerializationError(format!("kipu.toml: {}", e)))?;
        Ok(std::fs::write(path, text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_always() {
        let config = KipuConfig::default();
        assert_eq!(config.durability, "always");
        assert_eq!(config.durability_mode().unwrap(), DurabilityMode::Always);
    }

    #[test]
    fn parse_standard() {
        let config: KipuConfig = toml::from_str("durability = \"standard\"").unwrap();
        assert!(matches!(
            config.durability_mode().unwrap(),
            DurabilityMode::Standard { .. }
        ));
    }

    #[test]
    fn parse_invalid_mode_returns_error() {
        let config: KipuConfig = toml::from_str("durability = \"turbo\"").unwrap();
        assert!(matches!(
            config.durability_mode(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn default_toml_matches_default() {
        let config: KipuConfig = toml::from_str(KipuConfig::default_toml()).unwrap();
        assert_eq!(config, KipuConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "durability = \"standard\"\n").unwrap();

        KipuConfig::write_default_if_missing(&path).unwrap();

        let config = KipuConfig::from_file(&path).unwrap();
        assert_eq!(config.durability, "standard");
        // Missing keys fall back to defaults
        assert_eq!(config.max_retries, KipuConfig::default().max_retries);
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = KipuConfig {
            durability: "standard".to_string(),
            max_retries: 9,
            retry_base_delay_ms: 2,
            retry_max_delay_ms: 20,
        };

        config.write_to_file(&path).unwrap();
        assert_eq!(KipuConfig::from_file(&path).unwrap(), config);

        let retry = config.retry();
        assert_eq!(retry.max_retries, 9);
        assert_eq!(retry.base_delay_ms, 2);
    }

    #[test]
    fn inverted_delays_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "retry_base_delay_ms = 100\nretry_max_delay_ms = 10\n").unwrap();
        assert!(KipuConfig::from_file(&path).is_err());
    }
}
