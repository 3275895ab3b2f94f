//! Configuration file for the ipconf CLI.
//!
//! ```toml
//! [negotiation]
//! mode = "any"
//! initial_timeout_ms = 2000
//! max_attempts = 4
//! deadline_secs = 30
//!
//! [logging]
//! level = "info"
//! ```

use ipconf_core::{NegotiationConfig, ProtocolMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ipconf configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Negotiation tuning
    #[serde(default)]
    pub negotiation: NegotiationSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[negotiation]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationSection {
    /// Allowed protocol variants
    #[serde(default)]
    pub mode: ProtocolMode,
    /// Wait before the first retransmission, in milliseconds
    #[serde(default = "default_initial_timeout_ms")]
    pub initial_timeout_ms: u64,
    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Retransmission interval ceiling, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Transmissions per protocol phase
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Longest single wait per interface, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Global deadline, in seconds
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values mirror NegotiationConfig::default()

fn default_initial_timeout_ms() -> u64 {
    duration_ms(NegotiationConfig::default().initial_timeout)
}

fn default_multiplier() -> f64 {
    NegotiationConfig::default().multiplier
}

fn default_max_backoff_ms() -> u64 {
    duration_ms(NegotiationConfig::default().max_backoff)
}

fn default_max_attempts() -> u32 {
    NegotiationConfig::default().max_attempts
}

fn default_poll_interval_ms() -> u64 {
    duration_ms(NegotiationConfig::default().poll_interval)
}

fn default_deadline_secs() -> u64 {
    NegotiationConfig::default().global_deadline.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for NegotiationSection {
    fn default() -> Self {
        Self {
            mode: ProtocolMode::default(),
            initial_timeout_ms: default_initial_timeout_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NegotiationSection {
    /// Convert to the core negotiation parameters
    #[must_use]
    pub fn to_negotiation(&self) -> NegotiationConfig {
        NegotiationConfig {
            mode: self.mode,
            initial_timeout: Duration::from_millis(self.initial_timeout_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_attempts: self.max_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            global_deadline: Duration::from_secs(self.deadline_secs),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/ipconf.toml")
    }

    /// Load the default file if the boot image ships one
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        self.negotiation.to_negotiation().validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.negotiation.to_negotiation(), NegotiationConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.negotiation.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [negotiation]
            mode = "bootp"
            max_attempts = 2
            "#,
        )
        .unwrap();

        let negotiation = config.negotiation.to_negotiation();
        assert_eq!(negotiation.mode, ProtocolMode::Bootp);
        assert_eq!(negotiation.max_attempts, 2);
        assert_eq!(negotiation.initial_timeout, Duration::from_secs(2));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_mode_alias() {
        let config: Config = toml::from_str("[negotiation]\nmode = \"any\"\n").unwrap();
        assert_eq!(config.negotiation.mode, ProtocolMode::Auto);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[negotiation]\ndeadline_secs = 5\n\n[logging]\nlevel = \"warn\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(
            config.negotiation.to_negotiation().global_deadline,
            Duration::from_secs(5)
        );
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(
            config.negotiation.max_attempts,
            deserialized.negotiation.max_attempts
        );
        assert_eq!(config.negotiation.mode, deserialized.negotiation.mode);
    }
}
