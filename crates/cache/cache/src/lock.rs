//! The get-or-lock protocol.
//!
//! [`CacheLock::get_or_lock`] returns the cached value when there is one.
//! Otherwise exactly one caller takes a short-lived lock on the key and is
//! told to compute the value; everyone else blocks until that caller
//! releases the lock (or the lock expires) and then reads the fresh value.
//!
//! # How It Works
//!
//! - The lock is the [`LOCK_SENTINEL`](crate::key::LOCK_SENTINEL) stored at the cache key itself by the
//!   `acquire_lock` script (`SET key LOCK NX EX timeout`). A successful
//!   acquire also clears the key's signal list of stale wake-ups.
//! - Waiters block on the signal key with `BRPOPLPUSH signal signal timeout`.
//!   Popping into the same list puts the token back, so a single push from
//!   the owner wakes every waiter.
//! - The `release_lock` script removes the sentinel if the owner never
//!   stored real data, pushes a token onto the signal list and lets the list
//!   expire after one second.
//!
//! The lock timeout bounds both how long a lock survives a crashed owner and
//! how long one wait iteration blocks, so waiters always get to re-contend.
//! There is no overall deadline unless [`LockOptions::wait_deadline`] is set.
//!
//! Ownership is not tokenized: whoever holds a [`LockGuard`] is trusted to
//! release.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::guard::FailureGuard;
use crate::key::{is_lock_sentinel, signal_key};
use crate::replica::ReplicaReadProxy;
use crate::script::{ACQUIRE_LOCK, RELEASE_LOCK, ScriptRegistry};

/// Tuning for [`CacheLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lock expiry and per-iteration wait. Whole seconds, at least one.
    pub timeout: Duration,
    /// Register the scripts without their documentation block.
    pub strip_scripts: bool,
    /// Give up waiting for a contended lock after this long.
    pub wait_deadline: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            strip_scripts: false,
            wait_deadline: None,
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// The key holds real data.
    Hit(Vec<u8>),
    /// The key is absent and no lock was requested.
    Miss,
    /// The caller owns the lock and must compute, store and release.
    Acquired(LockGuard),
    /// The backend is unavailable and the failure was absorbed. Compute
    /// without the cache.
    Degraded,
}

impl Lookup {
    /// Whether the caller holds the lock for this key.
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Hit(value) => Some(value),
            _ => None,
        }
    }

    /// Take the cached value. Dropping an `Acquired` lookup releases the
    /// lock in the background.
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Self::Hit(value) => Some(value),
            _ => None,
        }
    }
}

/// Stampede-safe access to cache keys on a primary backend.
#[derive(Clone)]
pub struct CacheLock {
    primary: Arc<dyn CacheBackend>,
    reader: ReplicaReadProxy,
    scripts: Arc<ScriptRegistry>,
    guard: FailureGuard,
    options: LockOptions,
}

impl CacheLock {
    /// Create a lock that reads through `reader` and runs scripts from
    /// `scripts` on `primary`. The registry must be bound to `primary`.
    pub fn new(
        primary: Arc<dyn CacheBackend>,
        reader: ReplicaReadProxy,
        scripts: Arc<ScriptRegistry>,
        guard: FailureGuard,
        options: LockOptions,
    ) -> Self {
        Self {
            primary,
            reader,
            scripts,
            guard,
            options,
        }
    }

    pub fn options(&self) -> LockOptions {
        self.options
    }

    /// The same lock bound to a different guard (and its scope).
    #[must_use]
    pub fn with_guard(&self, guard: FailureGuard) -> Self {
        Self {
            primary: Arc::clone(&self.primary),
            reader: self.reader.with_guard(guard.clone()),
            scripts: Arc::clone(&self.scripts),
            guard,
            options: self.options,
        }
    }

    fn lock_seconds(&self) -> u64 {
        self.options.timeout.as_secs().max(1)
    }

    /// Return the cached value for `key`, or the lock on it.
    ///
    /// Never returns [`Lookup::Miss`]. Transient failures become
    /// [`Lookup::Degraded`] when the guard's policy degrades; otherwise they
    /// propagate, as do protocol, configuration and degraded-client errors.
    pub async fn get_or_lock(&self, key: &str) -> Result<Lookup, CacheError> {
        let outcome = self.guard.degrade(self.wait_for_value_or_lock(key)).await?;
        Ok(match outcome {
            Some(Some(value)) => Lookup::Hit(value),
            Some(None) => Lookup::Acquired(LockGuard::new(self.clone(), key)),
            None => Lookup::Degraded,
        })
    }

    /// `Ok(Some(data))` on a hit, `Ok(None)` when the lock was taken.
    async fn wait_for_value_or_lock(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let acquire = self
            .scripts
            .load(ACQUIRE_LOCK, self.options.strip_scripts)
            .await?;
        let primary = self.primary.id();
        let signal = signal_key(key);
        let keys = [key, signal.as_str()];
        let args = [self.lock_seconds().to_string()];
        let wait = Duration::from_secs(self.lock_seconds());
        let started = Instant::now();

        loop {
            match self.reader.read(key).await? {
                Some(data) if !is_lock_sentinel(&data) => return Ok(Some(data)),
                Some(_) => {}
                None => {
                    let reply = self
                        .guard
                        .circuit(&primary, || self.primary.eval_script(&acquire, &keys, &args))
                        .await?;
                    if reply.is_truthy() {
                        debug!(key, "acquired cache lock");
                        return Ok(None);
                    }
                }
            }

            let wait = match self.options.wait_deadline {
                Some(deadline) => wait.min(deadline.saturating_sub(started.elapsed())),
                None => wait,
            };
            if wait.is_zero() {
                return Err(CacheError::Timeout(format!(
                    "gave up waiting for the lock on `{key}` after {:?}",
                    started.elapsed()
                )));
            }

            debug!(key, ?wait, "waiting for cache lock");
            self.guard
                .circuit(&primary, || {
                    self.primary.blocking_pop_push(&signal, &signal, wait)
                })
                .await?;
        }
    }

    /// Clear the lock on `key` if it still holds the sentinel and wake all
    /// waiters. Safe to call after real data was stored.
    pub async fn release(&self, key: &str) -> Result<(), CacheError> {
        self.guard.degrade(self.release_and_notify(key)).await?;
        Ok(())
    }

    async fn release_and_notify(&self, key: &str) -> Result<(), CacheError> {
        let release = self
            .scripts
            .load(RELEASE_LOCK, self.options.strip_scripts)
            .await?;
        let primary = self.primary.id();
        let signal = signal_key(key);
        let keys = [key, signal.as_str()];

        self.guard
            .circuit(&primary, || self.primary.eval_script(&release, &keys, &[]))
            .await?;
        debug!(key, "released cache lock");
        Ok(())
    }
}

/// Ownership of the lock on one cache key.
///
/// Call [`release`](Self::release) once the value is stored (or computing it
/// failed). A guard dropped while still armed spawns the release on the
/// current Tokio runtime, so waiters are woken on every exit path. Without a
/// runtime the lock simply expires after its timeout.
pub struct LockGuard {
    lock: Option<CacheLock>,
    key: String,
}

impl LockGuard {
    fn new(lock: CacheLock, key: &str) -> Self {
        Self {
            lock: Some(lock),
            key: key.to_owned(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock and wake waiters.
    pub async fn release(mut self) -> Result<(), CacheError> {
        match self.lock.take() {
            Some(lock) => lock.release(&self.key).await,
            None => Ok(()),
        }
    }

    /// Disarm the guard without releasing. The sentinel stays until the lock
    /// timeout expires it and waiters only wake when their wait times out.
    pub fn abandon(mut self) {
        self.lock = None;
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("armed", &self.lock.is_some())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        let key = std::mem::take(&mut self.key);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = lock.release(&key).await {
                    warn!(key = %key, error = %e, "failed to release cache lock on drop");
                }
            });
        } else {
            warn!(key = %key, "no runtime to release cache lock, it will expire");
        }
    }
}
