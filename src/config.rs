//! Configuration management for the election engine
//!
//! Loads tunables from environment variables with validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for a cast transaction in milliseconds (default: 5 seconds)
    pub cast_timeout_ms: u64,

    /// Retries for casts and lifecycle transactions that hit a write conflict
    pub conflict_retries: u32,

    /// Buffer size of the tally notification channel
    pub notifier_capacity: usize,

    /// Prefix for human-facing ballot receipt numbers
    pub ballot_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cast_timeout_ms: 5000,
            conflict_retries: 3,
            notifier_capacity: 64,
            ballot_prefix: "B".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        let config = Self {
            cast_timeout_ms: env_or("ELECTION_CAST_TIMEOUT_MS", defaults.cast_timeout_ms)?,
            conflict_retries: env_or("ELECTION_CONFLICT_RETRIES", defaults.conflict_retries)?,
            notifier_capacity: env_or("ELECTION_NOTIFIER_CAPACITY", defaults.notifier_capacity)?,
            ballot_prefix: std::env::var("ELECTION_BALLOT_PREFIX")
                .unwrap_or(defaults.ballot_prefix),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            cast_timeout_ms: 2000,
            conflict_retries: 5,
            notifier_capacity: 16,
            ballot_prefix: "B".to_string(),
        }
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.cast_timeout_ms == 0 {
            return Err(Error::config("ELECTION_CAST_TIMEOUT_MS must be greater than zero"));
        }

        if self.notifier_capacity == 0 {
            return Err(Error::config("ELECTION_NOTIFIER_CAPACITY must be greater than zero"));
        }

        if self.ballot_prefix.is_empty()
            || !self.ballot_prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::config(
                "ELECTION_BALLOT_PREFIX must be non-empty and alphanumeric",
            ));
        }

        Ok(())
    }

    /// Cast deadline as a duration
    pub fn cast_timeout(&self) -> Duration {
        Duration::from_millis(self.cast_timeout_ms)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `election_engine=debug`
    pub level: String,
    /// `full`, `compact` or `pretty`
    pub format: String,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let engine = EngineConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "full".to_string()),
        };

        Ok(Self { engine, logging })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        };

        Self {
            engine: EngineConfig::for_testing(),
            logging,
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid {name}: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
