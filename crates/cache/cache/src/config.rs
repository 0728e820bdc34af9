use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::CacheError;
use crate::guard::DegradePolicy;
use crate::lock::LockOptions;
use crate::provision::ConnectionSettings;

/// Cache client configuration, loaded from TOML.
///
/// # Example
///
/// ```toml
/// redis = "redis://127.0.0.1:6379/0"
/// degrade_on_failure = true
/// degrade_persistent_per_scope = true
/// lock_timeout_seconds = 60
///
/// [replica]
/// host = "replica.internal"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Primary connection. Required, but only checked when the connection is
    /// first used.
    pub redis: Option<ConnectionSettings>,
    /// Optional read replica used for plain lookups.
    pub replica: Option<ConnectionSettings>,
    /// Treat connectivity and timeout failures as cache misses.
    #[serde(default)]
    pub degrade_on_failure: bool,
    /// Stop calling a failed connection until the scope is reset.
    #[serde(default)]
    pub degrade_persistent_per_scope: bool,
    /// Lock expiry, also the longest a single wait for a lock blocks.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_seconds: u64,
    /// Register scripts without their documentation block.
    #[serde(default)]
    pub strip_scripts: bool,
    /// Overall limit on waiting for a contended lock. Unlimited when unset.
    pub lock_wait_deadline_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: None,
            replica: None,
            degrade_on_failure: false,
            degrade_persistent_per_scope: false,
            lock_timeout_seconds: default_lock_timeout(),
            strip_scripts: false,
            lock_wait_deadline_seconds: None,
        }
    }
}

fn default_lock_timeout() -> u64 {
    60
}

impl CacheConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, CacheError> {
        let config: Self =
            toml::from_str(s).map_err(|e| CacheError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges. Connection settings are checked at provisioning.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.lock_timeout_seconds < 1 {
            return Err(CacheError::Configuration(
                "lock_timeout_seconds must be >= 1".into(),
            ));
        }
        if self.lock_wait_deadline_seconds == Some(0) {
            return Err(CacheError::Configuration(
                "lock_wait_deadline_seconds must be >= 1 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> DegradePolicy {
        DegradePolicy {
            degrade_on_failure: self.degrade_on_failure,
            persistent_per_scope: self.degrade_persistent_per_scope,
        }
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_secs(self.lock_timeout_seconds),
            strip_scripts: self.strip_scripts,
            wait_deadline: self.lock_wait_deadline_seconds.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::from_toml_str("").unwrap();
        assert!(config.redis.is_none());
        assert!(config.replica.is_none());
        assert!(!config.degrade_on_failure);
        assert!(!config.degrade_persistent_per_scope);
        assert_eq!(config.lock_timeout_seconds, 60);
        assert!(!config.strip_scripts);
        assert!(config.lock_wait_deadline_seconds.is_none());

        let options = config.lock_options();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert!(options.wait_deadline.is_none());
        assert_eq!(config.policy(), DegradePolicy::default());
    }

    #[test]
    fn full_config() {
        let toml = r#"
            redis = "redis://cache:6379/1"
            degrade_on_failure = true
            degrade_persistent_per_scope = true
            lock_timeout_seconds = 30
            strip_scripts = true
            lock_wait_deadline_seconds = 120

            [replica]
            host = "replica"
            port = 6380
        "#;

        let config = CacheConfig::from_toml_str(toml).unwrap();
        assert_eq!(
            config.redis,
            Some(ConnectionSettings::Url("redis://cache:6379/1".into()))
        );
        assert_eq!(
            config.replica.as_ref().map(ConnectionSettings::identity).unwrap().as_str(),
            "redis://replica:6380/0"
        );
        assert_eq!(
            config.policy(),
            DegradePolicy {
                degrade_on_failure: true,
                persistent_per_scope: true,
            }
        );
        let options = config.lock_options();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.strip_scripts);
        assert_eq!(options.wait_deadline, Some(Duration::from_secs(120)));
    }

    #[test]
    fn rejects_zero_lock_timeout() {
        let err = CacheConfig::from_toml_str("lock_timeout_seconds = 0").unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn rejects_zero_wait_deadline() {
        assert!(CacheConfig::from_toml_str("lock_wait_deadline_seconds = 0").is_err());
    }

    #[test]
    fn rejects_unknown_connection_fields() {
        let err = CacheConfig::from_toml_str(
            r#"
            [redis]
            hostname = "typo"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
