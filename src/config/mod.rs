//! Cache configuration
//!
//! Parses a properties-style file into `CacheConfig`. The format is
//! key-value based:
//! - Lines starting with # are comments
//! - Empty lines are ignored
//! - Format: `key value` (space separated) or `key=value`
//!
//! Millisecond options accept `-1` for "unbounded"/"disabled", matching
//! the conventional object-pool sentinels.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::pool::PoolConfig;
use crate::utils::ConfigError;

/// Default per-operation I/O timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Parsed cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Single endpoint, `host:port`
    pub host: Option<String>,
    /// Sharded endpoints, comma-separated `host:port` list; wins over `host`
    pub shard_host: Option<String>,
    /// Connect and per-operation I/O timeout
    pub timeout: Duration,
    pub pool: PoolConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: None,
            shard_host: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            pool: PoolConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = parse_line(line)?;
            config.apply(key, value)?;
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "host" => self.host = Some(value.to_string()),
            "shardHost" => self.shard_host = Some(value.to_string()),
            "timeout" => self.timeout = Duration::from_millis(parse_u64(key, value)?),
            "pool.maxTotal" => self.pool.max_total = parse_u64(key, value)? as usize,
            "pool.minIdle" => self.pool.min_idle = parse_u64(key, value)? as usize,
            "pool.lifo" => self.pool.lifo = parse_bool(key, value)?,
            "pool.blockWhenExhausted" => {
                self.pool.block_when_exhausted = parse_bool(key, value)?
            }
            "pool.maxWaitMillis" => self.pool.max_wait = parse_millis(key, value)?,
            "pool.testOnBorrow" => self.pool.test_on_borrow = parse_bool(key, value)?,
            "pool.testOnReturn" => self.pool.test_on_return = parse_bool(key, value)?,
            "pool.testWhileIdle" => self.pool.test_while_idle = parse_bool(key, value)?,
            "pool.timeBetweenEvictionRunsMillis" => {
                self.pool.time_between_eviction_runs = parse_millis(key, value)?
            }
            "pool.numTestsPerEvictionRun" => {
                self.pool.num_tests_per_eviction_run = parse_u64(key, value)? as usize
            }
            "pool.minEvictableIdleTimeMillis" => {
                self.pool.min_evictable_idle = parse_millis(key, value)?
            }
            "pool.softMinEvictableIdleTimeMillis" => {
                self.pool.soft_min_evictable_idle = parse_millis(key, value)?
            }
            _ => debug!(key, "ignoring unrecognized configuration key"),
        }
        Ok(())
    }
}

/// Parse a single line into a key-value pair
fn parse_line(line: &str) -> Result<(&str, &str), ConfigError> {
    let (key, value) = if let Some(eq_pos) = line.find('=') {
        // key=value format
        (line[..eq_pos].trim(), line[eq_pos + 1..].trim())
    } else {
        // key value format (space separated)
        let mut parts = line.splitn(2, char::is_whitespace);
        (
            parts.next().unwrap_or_default(),
            parts.next().map(str::trim).unwrap_or_default(),
        )
    };

    if key.is_empty() || value.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    Ok((key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Millisecond option: `-1` means "unbounded"/"disabled"
fn parse_millis(key: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let millis: i64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;

    if millis < 0 {
        Ok(None)
    } else {
        Ok(Some(Duration::from_millis(millis as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = CacheConfig::parse(
            "# cache backend\n\
             shardHost 10.0.0.1:6379,10.0.0.2:6379\n\
             timeout 500\n\
             \n\
             pool.maxTotal 16\n\
             pool.lifo false\n\
             pool.maxWaitMillis 250\n\
             pool.testOnBorrow true\n\
             pool.timeBetweenEvictionRunsMillis 30000\n\
             pool.numTestsPerEvictionRun 5\n",
        )
        .unwrap();

        assert_eq!(
            config.shard_host.as_deref(),
            Some("10.0.0.1:6379,10.0.0.2:6379")
        );
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.pool.max_total, 16);
        assert!(!config.pool.lifo);
        assert_eq!(config.pool.max_wait, Some(Duration::from_millis(250)));
        assert!(config.pool.test_on_borrow);
        assert_eq!(
            config.pool.time_between_eviction_runs,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.pool.num_tests_per_eviction_run, 5);
    }

    #[test]
    fn test_parse_key_equals_value() {
        let config = CacheConfig::parse("host=127.0.0.1:6379\npool.testOnReturn=true\n").unwrap();
        assert_eq!(config.host.as_deref(), Some("127.0.0.1:6379"));
        assert!(config.pool.test_on_return);
    }

    #[test]
    fn test_negative_millis_disable() {
        let config = CacheConfig::parse(
            "host 127.0.0.1:6379\n\
             pool.maxWaitMillis -1\n\
             pool.timeBetweenEvictionRunsMillis -1\n\
             pool.minEvictableIdleTimeMillis -1\n",
        )
        .unwrap();

        assert_eq!(config.pool.max_wait, None);
        assert_eq!(config.pool.time_between_eviction_runs, None);
        assert_eq!(config.pool.min_evictable_idle, None);
    }

    #[test]
    fn test_invalid_value_rejected() {
        assert!(matches!(
            CacheConfig::parse("pool.maxTotal lots\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            CacheConfig::parse("pool.lifo 1\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_empty_value_rejected_in_both_forms() {
        assert!(matches!(
            CacheConfig::parse("host=\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            CacheConfig::parse("=6379\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            CacheConfig::parse("host \n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = CacheConfig::parse("host 127.0.0.1:6379\nsome.future.option 42\n").unwrap();
        assert_eq!(config.host.as_deref(), Some("127.0.0.1:6379"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CacheConfig::parse("").unwrap();
        assert_eq!(config.host, None);
        assert_eq!(config.shard_host, None);
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.pool.max_total, 8);
        assert!(config.pool.lifo);
    }
}
