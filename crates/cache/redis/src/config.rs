use std::time::Duration;

use serde::Deserialize;

/// Pool and timeout settings for the Redis backend.
///
/// Connection targets come from the cache configuration; this only tunes how
/// each target is reached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Number of connections in each `deadpool-redis` pool.
    pub pool_size: usize,

    /// Timeout for creating or checking out a pooled connection.
    pub connection_timeout_ms: u64,

    /// Timeout for a single command. Blocking pops get this on top of their
    /// own wait.
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            connection_timeout_ms: 5_000,
            command_timeout_ms: 5_000,
        }
    }
}

impl RedisConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = RedisConfig::default();
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.connection_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.command_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: RedisConfig = toml::from_str("pool_size = 2\ncommand_timeout_ms = 250").unwrap();
        assert_eq!(cfg.pool_size, 2);
        assert_eq!(cfg.command_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.connection_timeout(), Duration::from_secs(5));
    }
}
