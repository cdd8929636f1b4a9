//! Session-level harness configuration
//!
//! Values come from the environment so CI can switch cleanup behavior
//! without touching test code:
//!
//! | Variable                       | Default  |
//! |--------------------------------|----------|
//! | `HARNESS_CLEANUP_STRATEGY`     | `always` |
//! | `HARNESS_POLL_INTERVAL_MS`     | `1000`   |
//! | `HARNESS_WAIT_TIMEOUT_SECS`    | `60`     |
//! | `HARNESS_UPDATE_TIMEOUT_SECS`  | `30`     |
//! | `HARNESS_CLEANUP_TIMEOUT_SECS` | `60`     |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cleanup::CleanupStrategy;
use crate::error::{Error, Result};

pub const CLEANUP_STRATEGY_ENV: &str = "HARNESS_CLEANUP_STRATEGY";
pub const POLL_INTERVAL_ENV: &str = "HARNESS_POLL_INTERVAL_MS";
pub const WAIT_TIMEOUT_ENV: &str = "HARNESS_WAIT_TIMEOUT_SECS";
pub const UPDATE_TIMEOUT_ENV: &str = "HARNESS_UPDATE_TIMEOUT_SECS";
pub const CLEANUP_TIMEOUT_ENV: &str = "HARNESS_CLEANUP_TIMEOUT_SECS";

/// Default pause between wait attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound for a single wait
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound for the whole conflict-retry loop of an update
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for confirming a single object is gone during cleanup
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    pub cleanup_strategy: CleanupStrategy,
    pub poll_interval: Duration,
    pub wait_timeout: Duration,
    pub update_timeout: Duration,
    pub cleanup_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cleanup_strategy: CleanupStrategy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            update_timeout: DEFAULT_UPDATE_TIMEOUT,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(CLEANUP_STRATEGY_ENV) {
            config.cleanup_strategy = value.parse()?;
        }
        if let Some(ms) = parse_number::<u64>(&lookup, POLL_INTERVAL_ENV)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_number::<u64>(&lookup, WAIT_TIMEOUT_ENV)? {
            config.wait_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number::<u64>(&lookup, UPDATE_TIMEOUT_ENV)? {
            config.update_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number::<u64>(&lookup, CLEANUP_TIMEOUT_ENV)? {
            config.cleanup_timeout = Duration::from_secs(secs);
        }

        if config.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "{POLL_INTERVAL_ENV} must be greater than zero"
            )));
        }

        Ok(config)
    }

    pub fn with_cleanup_strategy(mut self, strategy: CleanupStrategy) -> Self {
        self.cleanup_strategy = strategy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_update_timeout(mut self, timeout: Duration) -> Self {
        self.update_timeout = timeout;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }
}

fn parse_number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::InvalidConfig(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
