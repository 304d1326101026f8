//! Observer configuration
//!
//! Defaults match a single production observer; every value can be
//! overridden from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use cbb_concurrency::{Retrial, WorkerConfig};

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Movement observer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Sleep between two poll cycles (env: CBB_OBSERVE_INTERVAL_SECS)
    pub observe_interval: Duration,
    /// Maximum concurrent movement checks (env: CBB_MAX_PARALLELISM)
    pub max_parallelism: usize,
    /// Drain timeout on stop (env: CBB_EXIT_TIMEOUT_SECS)
    pub exit_timeout: Duration,
    /// Only subscriptions lagging more than this many blocks behind the
    /// chain tip are checked (env: CBB_BLOCK_HEIGHT_MARGIN)
    pub block_height_margin: u64,
    /// Retry policy around each check
    /// (env: CBB_CHECK_RETRY_LIMIT, negative = unlimited; CBB_CHECK_RETRY_DELAY_MS)
    pub check_retrial: Retrial,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            observe_interval: Duration::from_secs(20),
            max_parallelism: 1000,
            exit_timeout: Duration::from_secs(30),
            block_height_margin: 0,
            check_retrial: Retrial::new(3, Duration::from_secs(1)),
        }
    }
}

impl ObserverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let observe_interval = parse::<u64, _>(&lookup, "CBB_OBSERVE_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.observe_interval);
        let max_parallelism = parse(&lookup, "CBB_MAX_PARALLELISM")?
            .unwrap_or(defaults.max_parallelism);
        let exit_timeout = parse::<u64, _>(&lookup, "CBB_EXIT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.exit_timeout);
        let block_height_margin = parse(&lookup, "CBB_BLOCK_HEIGHT_MARGIN")?
            .unwrap_or(defaults.block_height_margin);

        let retry_delay = parse::<u64, _>(&lookup, "CBB_CHECK_RETRY_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.check_retrial.delay);
        let check_retrial = match parse::<i64, _>(&lookup, "CBB_CHECK_RETRY_LIMIT")? {
            Some(limit) => Retrial::from_raw(limit, retry_delay),
            None => Retrial {
                delay: retry_delay,
                ..defaults.check_retrial
            },
        };

        let config = Self {
            observe_interval,
            max_parallelism,
            exit_timeout,
            block_height_margin,
            check_retrial,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::Invalid(
                "CBB_MAX_PARALLELISM must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker settings derived from this configuration
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_parallelism: self.max_parallelism,
            exit_timeout: self.exit_timeout,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("{key}={raw:?}: {e}"))),
    }
}
