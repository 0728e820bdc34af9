//! Deferred construction of backend connections.
//!
//! A [`LazyBackend`] holds connection settings and a [`BackendFactory`] and
//! only builds the real backend on the first operation, so a process without
//! cache settings can still start and run code paths that never touch the
//! cache.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backend::{CacheBackend, ConnectionId, ScriptHandle, ScriptReply};
use crate::error::CacheError;

/// Connection settings, either a single URL or a mapping of parameters.
///
/// ```toml
/// redis = "redis://:secret@cache.internal:6379/1"
///
/// [replica]
/// host = "replica.internal"
/// db = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ConnectionSettings {
    Url(String),
    Params(ConnectionParams),
}

/// Structured connection parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParams {
    /// Server host name. Defaults to `127.0.0.1`.
    pub host: Option<String>,
    /// Server port. Defaults to `6379`.
    pub port: Option<u16>,
    /// Logical database index. Defaults to `0`.
    pub db: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connect over TLS.
    #[serde(default)]
    pub tls: bool,
}

impl ConnectionParams {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 6379;

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(Self::DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(Self::DEFAULT_PORT)
    }

    pub fn db(&self) -> i64 {
        self.db.unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.host.is_none()
            && self.port.is_none()
            && self.db.is_none()
            && self.username.is_none()
            && self.password.is_none()
    }
}

impl ConnectionSettings {
    /// Reject settings that carry no connection information. `setting` names
    /// the configuration entry in the error message.
    pub fn validate(&self, setting: &str) -> Result<(), CacheError> {
        let empty = match self {
            Self::Url(url) => url.trim().is_empty(),
            Self::Params(params) => {
                params.is_empty() || params.host.as_deref().is_some_and(|h| h.trim().is_empty())
            }
        };
        if empty {
            return Err(CacheError::Configuration(format!(
                "the `{setting}` setting must not be empty"
            )));
        }
        Ok(())
    }

    /// Connection identity with any credentials removed.
    pub fn identity(&self) -> ConnectionId {
        match self {
            Self::Url(url) => ConnectionId::new(redact_url(url.trim())),
            Self::Params(params) => {
                let scheme = if params.tls { "rediss" } else { "redis" };
                ConnectionId::new(format!(
                    "{scheme}://{}:{}/{}",
                    params.host(),
                    params.port(),
                    params.db()
                ))
            }
        }
    }
}

/// Drop the userinfo part of a URL so passwords never reach logs or errors.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_owned();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
        None => url.to_owned(),
    }
}

/// Builds a backend from connection settings.
///
/// Backend crates provide implementations; construction should not perform
/// network I/O.
pub trait BackendFactory: Send + Sync {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn CacheBackend>, CacheError>;
}

/// A backend provisioned on first use.
///
/// Until the first operation the slot is empty. Missing or empty settings
/// fail that operation with [`CacheError::Configuration`] and leave the slot
/// empty, so nothing is cached on failure.
pub struct LazyBackend {
    setting: &'static str,
    settings: Option<ConnectionSettings>,
    factory: Arc<dyn BackendFactory>,
    id: ConnectionId,
    inner: Mutex<Option<Arc<dyn CacheBackend>>>,
}

impl LazyBackend {
    /// Create a lazy backend for the configuration entry named `setting`.
    pub fn new(
        setting: &'static str,
        settings: Option<ConnectionSettings>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let id = settings.as_ref().map_or_else(
            || ConnectionId::new(format!("{setting}:unconfigured")),
            ConnectionSettings::identity,
        );
        Self {
            setting,
            settings,
            factory,
            id,
            inner: Mutex::new(None),
        }
    }

    /// Whether the real backend has been built.
    pub fn is_provisioned(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Return the real backend, building it if needed.
    pub fn backend(&self) -> Result<Arc<dyn CacheBackend>, CacheError> {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backend) = slot.as_ref() {
            return Ok(Arc::clone(backend));
        }

        let settings = self.settings.as_ref().ok_or_else(|| {
            CacheError::Configuration(format!(
                "you must specify the `{}` setting to use the cache",
                self.setting
            ))
        })?;
        settings.validate(self.setting)?;

        let backend = self.factory.connect(settings)?;
        debug!(connection = %self.id, setting = self.setting, "provisioned cache backend");
        *slot = Some(Arc::clone(&backend));
        Ok(backend)
    }
}

#[async_trait]
impl CacheBackend for LazyBackend {
    fn id(&self) -> ConnectionId {
        self.id.clone()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend()?.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.backend()?.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.backend()?.delete(key).await
    }

    async fn load_script(&self, name: &str, source: &str) -> Result<ScriptHandle, CacheError> {
        self.backend()?.load_script(name, source).await
    }

    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[&str],
        args: &[String],
    ) -> Result<ScriptReply, CacheError> {
        self.backend()?.eval_script(script, keys, args).await
    }

    async fn blocking_pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend()?
            .blocking_pop_push(source, destination, timeout)
            .await
    }
}
