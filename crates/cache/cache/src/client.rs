use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::guard::{DegradePolicy, DegradeScope, FailureGuard};
use crate::key::is_lock_sentinel;
use crate::lock::{CacheLock, LockOptions, Lookup};
use crate::provision::{BackendFactory, LazyBackend};
use crate::replica::ReplicaReadProxy;
use crate::script::ScriptRegistry;

/// Read-through cache client.
///
/// Combines a primary backend, an optional read replica, the failure guard
/// and the get-or-lock protocol behind one handle. Cloning is cheap and
/// clones share connections, scripts and the degrade scope.
#[derive(Clone)]
pub struct CacheClient {
    primary: Arc<dyn CacheBackend>,
    reader: ReplicaReadProxy,
    lock: CacheLock,
    guard: FailureGuard,
}

impl CacheClient {
    /// Create a client over already-built backends with a fresh
    /// [`DegradeScope`].
    pub fn new(
        primary: Arc<dyn CacheBackend>,
        replica: Option<Arc<dyn CacheBackend>>,
        policy: DegradePolicy,
        options: LockOptions,
    ) -> Self {
        let guard = FailureGuard::new(policy, DegradeScope::new());
        let reader = ReplicaReadProxy::new(Arc::clone(&primary), replica, guard.clone());
        let scripts = Arc::new(ScriptRegistry::embedded(Arc::clone(&primary)));
        let lock = CacheLock::new(
            Arc::clone(&primary),
            reader.clone(),
            scripts,
            guard.clone(),
            options,
        );
        Self {
            primary,
            reader,
            lock,
            guard,
        }
    }

    /// Create a client whose connections are provisioned by `factory` on
    /// first use.
    ///
    /// Only value ranges are checked here. A missing `redis` setting is
    /// reported by the first cache operation.
    pub fn from_config(
        config: &CacheConfig,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, CacheError> {
        config.validate()?;

        let primary: Arc<dyn CacheBackend> = Arc::new(LazyBackend::new(
            "redis",
            config.redis.clone(),
            Arc::clone(&factory),
        ));
        let replica = config.replica.clone().map(|settings| {
            Arc::new(LazyBackend::new("replica", Some(settings), Arc::clone(&factory)))
                as Arc<dyn CacheBackend>
        });

        Ok(Self::new(
            primary,
            replica,
            config.policy(),
            config.lock_options(),
        ))
    }

    /// A client sharing this one's connections and scripts but recording
    /// degraded connections in `scope`.
    #[must_use]
    pub fn scoped(&self, scope: DegradeScope) -> Self {
        let guard = self.guard.with_scope(scope);
        Self {
            primary: Arc::clone(&self.primary),
            reader: self.reader.with_guard(guard.clone()),
            lock: self.lock.with_guard(guard.clone()),
            guard,
        }
    }

    pub fn scope(&self) -> &DegradeScope {
        self.guard.scope()
    }

    /// Clear every degraded-connection mark in this client's scope.
    ///
    /// Hosts call this at unit-of-work boundaries.
    pub fn reset(&self) {
        self.guard.scope().reset();
    }

    pub fn lock(&self) -> &CacheLock {
        &self.lock
    }

    /// Plain lookup, replica first. A degraded failure and a key whose value
    /// is still being computed both read as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self.guard.degrade(self.reader.read(key)).await?.flatten();
        Ok(value.filter(|data| !is_lock_sentinel(data)))
    }

    /// Store `value` at `key` on the primary.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let primary = self.primary.id();
        self.guard
            .run(&primary, || self.primary.set(key, value, ttl))
            .await?;
        Ok(())
    }

    /// Delete `key` on the primary. A degraded failure reads as "not found".
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let primary = self.primary.id();
        let deleted = self
            .guard
            .run(&primary, || self.primary.delete(key))
            .await?;
        Ok(deleted.unwrap_or(false))
    }

    /// See [`CacheLock::get_or_lock`].
    pub async fn get_or_lock(&self, key: &str) -> Result<Lookup, CacheError> {
        self.lock.get_or_lock(key).await
    }

    /// See [`CacheLock::release`].
    pub async fn release(&self, key: &str) -> Result<(), CacheError> {
        self.lock.release(key).await
    }

    /// Look `key` up, taking the lock on a miss only when `lock` is set.
    pub async fn getting(&self, key: &str, lock: bool) -> Result<Lookup, CacheError> {
        if lock {
            return self.get_or_lock(key).await;
        }
        match self.guard.degrade(self.reader.read(key)).await? {
            Some(Some(value)) if !is_lock_sentinel(&value) => Ok(Lookup::Hit(value)),
            Some(_) => Ok(Lookup::Miss),
            None => Ok(Lookup::Degraded),
        }
    }

    /// Return the cached value for `key`, computing and storing it under the
    /// lock on a miss.
    ///
    /// The lock is released whether `compute` succeeds or fails. When the
    /// cache is degraded `compute` runs and its result is not stored. A
    /// connection already skipped for this scope counts as degraded here, so
    /// only `compute` errors and non-transient cache errors reach the caller.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Vec<u8>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: From<CacheError>,
    {
        let lookup = match self.get_or_lock(key).await {
            Err(CacheError::DegradedClient(conn)) => {
                debug!(key, connection = %conn, "skipping degraded cache");
                Lookup::Degraded
            }
            other => other?,
        };

        match lookup {
            Lookup::Hit(value) => Ok(value),
            Lookup::Miss | Lookup::Degraded => compute().await,
            Lookup::Acquired(guard) => {
                let computed = compute().await;
                let stored = match &computed {
                    Ok(value) => skip_degraded(self.set(key, value, ttl).await),
                    Err(_) => Ok(()),
                };
                skip_degraded(guard.release().await)?;
                stored?;
                computed
            }
        }
    }
}

/// Treat a short-circuited call as done.
fn skip_degraded(result: Result<(), CacheError>) -> Result<(), CacheError> {
    match result {
        Err(CacheError::DegradedClient(_)) => Ok(()),
        other => other,
    }
}
