//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Environment variable holding the default expiration in milliseconds.
pub const DEFAULT_EXPIRATION_VAR: &str = "CACHEMAP_DEFAULT_EXPIRATION_MS";

/// Environment variable holding the initial entry capacity.
pub const INITIAL_CAPACITY_VAR: &str = "CACHEMAP_INITIAL_CAPACITY";

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Expiration applied to keys written without an expiration and without
    /// a registered record, in milliseconds. `None` = such keys never expire.
    pub default_expiration_ms: Option<i64>,
    /// Number of entries to pre-allocate room for
    pub initial_capacity: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// Unparseable values fall back to the defaults.
    ///
    /// # Environment Variables
    /// - `CACHEMAP_DEFAULT_EXPIRATION_MS` - Default expiration (default: none)
    /// - `CACHEMAP_INITIAL_CAPACITY` - Pre-allocated entries (default: 0)
    pub fn from_env() -> Self {
        Self {
            default_expiration_ms: env::var(DEFAULT_EXPIRATION_VAR)
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            initial_capacity: env::var(INITIAL_CAPACITY_VAR)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
        }
    }

    /// Same as [`Config::from_env`], but reports unparseable values instead of
    /// silently using the defaults.
    pub fn try_from_env() -> Result<Self> {
        let default_expiration_ms = match env::var(DEFAULT_EXPIRATION_VAR) {
            Ok(raw) => Some(parse_var(DEFAULT_EXPIRATION_VAR, &raw)?),
            Err(_) => None,
        };
        let initial_capacity = match env::var(INITIAL_CAPACITY_VAR) {
            Ok(raw) => parse_var(INITIAL_CAPACITY_VAR, &raw)?,
            Err(_) => 0,
        };

        Ok(Self {
            default_expiration_ms,
            initial_capacity,
        })
    }

    /// Returns the default expiration as a signed duration, if configured.
    pub fn default_expiration(&self) -> Option<TimeDelta> {
        self.default_expiration_ms.map(TimeDelta::milliseconds)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CacheError::InvalidConfig(format!("{}={:?}", name, raw)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_expiration_ms: None,
            initial_capacity: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.default_expiration_ms, None);
        assert_eq!(config.initial_capacity, 0);
        assert!(config.default_expiration().is_none());
    }

    #[test]
    fn test_default_expiration_conversion() {
        let config = Config {
            default_expiration_ms: Some(-250),
            initial_capacity: 8,
        };
        assert_eq!(
            config.default_expiration(),
            Some(TimeDelta::milliseconds(-250))
        );
    }

    // Env vars are process-global, so every env scenario lives in one test.
    #[test]
    fn test_config_from_env() {
        env::remove_var(DEFAULT_EXPIRATION_VAR);
        env::remove_var(INITIAL_CAPACITY_VAR);

        let config = Config::from_env();
        assert_eq!(config, Config::default());
        assert_eq!(Config::try_from_env().unwrap(), Config::default());

        env::set_var(DEFAULT_EXPIRATION_VAR, " 1500 ");
        env::set_var(INITIAL_CAPACITY_VAR, "64");
        let config = Config::try_from_env().unwrap();
        assert_eq!(config.default_expiration_ms, Some(1500));
        assert_eq!(config.initial_capacity, 64);

        env::set_var(INITIAL_CAPACITY_VAR, "lots");
        let config = Config::from_env();
        assert_eq!(config.initial_capacity, 0);
        assert_eq!(config.default_expiration_ms, Some(1500));
        assert!(matches!(
            Config::try_from_env(),
            Err(CacheError::InvalidConfig(_))
        ));

        env::remove_var(DEFAULT_EXPIRATION_VAR);
        env::remove_var(INITIAL_CAPACITY_VAR);
    }

    #[test]
    fn test_config_serializes() {
        let config = Config {
            default_expiration_ms: Some(10),
            initial_capacity: 4,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
