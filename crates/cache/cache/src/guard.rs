//! Failure degradation for backend calls.
//!
//! Two guards compose around any backend operation:
//!
//! - [`FailureGuard::circuit`] short-circuits calls on a connection already
//!   marked degraded in the current [`DegradeScope`] and marks a connection
//!   on its first connectivity or timeout failure. Only active when
//!   [`DegradePolicy::persistent_per_scope`] is set.
//! - [`FailureGuard::degrade`] turns connectivity and timeout failures into a
//!   "no value" result (`Ok(None)`) when
//!   [`DegradePolicy::degrade_on_failure`] is set.
//!
//! [`FailureGuard::run`] is `degrade(circuit(op))`.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, error, warn};

use crate::backend::ConnectionId;
use crate::error::CacheError;

/// What to do with transient backend failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DegradePolicy {
    /// Absorb connectivity and timeout failures into a cache miss.
    pub degrade_on_failure: bool,
    /// After the first transient failure on a connection, stop calling it
    /// until the scope is reset. Only honored with `degrade_on_failure`.
    pub persistent_per_scope: bool,
}

/// Connections treated as unreachable within one unit of work.
///
/// Cheap to clone; clones share the same set. The host calls
/// [`reset`](Self::reset) at scope boundaries (e.g. request start and end).
#[derive(Debug, Clone, Default)]
pub struct DegradeScope {
    degraded: Arc<DashSet<ConnectionId>>,
}

impl DegradeScope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `conn` as degraded. Returns `true` if it was not marked before.
    pub fn mark(&self, conn: &ConnectionId) -> bool {
        self.degraded.insert(conn.clone())
    }

    pub fn is_degraded(&self, conn: &ConnectionId) -> bool {
        self.degraded.contains(conn)
    }

    /// Forget every degraded mark.
    pub fn reset(&self) {
        if !self.degraded.is_empty() {
            debug!(count = self.degraded.len(), "clearing degraded connection marks");
        }
        self.degraded.clear();
    }

    pub fn len(&self) -> usize {
        self.degraded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Applies a [`DegradePolicy`] to backend calls, recording marks in a
/// [`DegradeScope`].
#[derive(Debug, Clone, Default)]
pub struct FailureGuard {
    policy: DegradePolicy,
    scope: DegradeScope,
}

impl FailureGuard {
    pub fn new(policy: DegradePolicy, scope: DegradeScope) -> Self {
        Self { policy, scope }
    }

    pub fn policy(&self) -> DegradePolicy {
        self.policy
    }

    pub fn scope(&self) -> &DegradeScope {
        &self.scope
    }

    /// The same policy bound to a different scope.
    #[must_use]
    pub fn with_scope(&self, scope: DegradeScope) -> Self {
        Self {
            policy: self.policy,
            scope,
        }
    }

    fn circuit_enabled(&self) -> bool {
        self.policy.degrade_on_failure && self.policy.persistent_per_scope
    }

    /// Run `op` against `conn` unless `conn` is degraded in this scope.
    ///
    /// Errors pass through unchanged; a transient one additionally marks
    /// `conn` so later calls fail with [`CacheError::DegradedClient`] without
    /// being attempted.
    pub async fn circuit<T, F, Fut>(&self, conn: &ConnectionId, op: F) -> Result<T, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        if !self.circuit_enabled() {
            return op().await;
        }

        if self.scope.is_degraded(conn) {
            return Err(CacheError::DegradedClient(conn.clone()));
        }

        let result = op().await;
        if let Err(e) = &result
            && e.is_degradable()
            && self.scope.mark(conn)
        {
            debug!(connection = %conn, error = %e, "marking connection degraded");
        }
        result
    }

    /// Await `fut`, absorbing transient failures into `Ok(None)` when the
    /// policy allows it.
    ///
    /// Protocol errors are logged and propagated. Configuration and
    /// degraded-client errors propagate untouched.
    pub async fn degrade<T, Fut>(&self, fut: Fut) -> Result<Option<T>, CacheError>
    where
        Fut: Future<Output = Result<T, CacheError>>,
    {
        match fut.await {
            Ok(value) => Ok(Some(value)),
            Err(e) if !self.policy.degrade_on_failure => Err(e),
            Err(CacheError::Connectivity(msg)) => {
                warn!(error = %msg, "cache is unreachable, treating as a miss");
                Ok(None)
            }
            Err(CacheError::Timeout(msg)) => {
                warn!(error = %msg, "cache timed out, treating as a miss");
                Ok(None)
            }
            Err(e @ CacheError::Protocol(_)) => {
                error!(error = %e, "cache backend error");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// `degrade(circuit(op))`.
    pub async fn run<T, F, Fut>(&self, conn: &ConnectionId, op: F) -> Result<Option<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        self.degrade(self.circuit(conn, op)).await
    }
}
