use std::path::Path;

use anyhow::Context;
use dogpile_cache::CacheConfig;
use dogpile_cache_redis::RedisConfig;
use serde::Deserialize;

/// The CLI configuration file: the cache settings at the top level plus an
/// optional `[pool]` table for the Redis backend.
///
/// ```toml
/// redis = "redis://127.0.0.1:6379/0"
/// lock_timeout_seconds = 30
///
/// [pool]
/// pool_size = 4
/// command_timeout_ms = 1000
/// ```
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(flatten)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pool: RedisConfig,
}

impl Settings {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(raw).context("invalid configuration")?;
        settings.cache.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("in {}", path.display()))
    }
}
