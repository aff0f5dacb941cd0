//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Default-sweep cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// A zero `default_expiration` means entries stored with `LifeSpan::Default`
/// never expire; a zero `cleanup_interval` disables the background janitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Life span applied to entries stored with `LifeSpan::Default`
    pub default_expiration: Duration,
    /// Background janitor interval
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_EXPIRATION_MS` - Default life span in milliseconds (default: 300000)
    /// - `CACHE_CLEANUP_INTERVAL_MS` - Janitor frequency in milliseconds (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_expiration: env_millis("CACHE_DEFAULT_EXPIRATION_MS")
                .unwrap_or(defaults.default_expiration),
            cleanup_interval: env_millis("CACHE_CLEANUP_INTERVAL_MS")
                .unwrap_or(defaults.cleanup_interval),
        }
    }

    pub fn with_default_expiration(mut self, default_expiration: Duration) -> Self {
        self.default_expiration = default_expiration;
        self
    }

    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiration: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(1),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.default_expiration, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::default()
            .with_default_expiration(Duration::from_millis(50))
            .with_cleanup_interval(Duration::ZERO);
        assert_eq!(config.default_expiration, Duration::from_millis(50));
        assert!(config.cleanup_interval.is_zero());
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("CACHE_DEFAULT_EXPIRATION_MS", "1500");
        env::set_var("CACHE_CLEANUP_INTERVAL_MS", "not-a-number");

        let config = CacheConfig::from_env();
        assert_eq!(config.default_expiration, Duration::from_millis(1500));
        assert_eq!(config.cleanup_interval, Duration::from_secs(1));

        env::remove_var("CACHE_DEFAULT_EXPIRATION_MS");
        env::remove_var("CACHE_CLEANUP_INTERVAL_MS");
    }
}
