use std::sync::Arc;

use tracing::error;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::guard::FailureGuard;

/// Routes plain lookups to a read replica, falling back to the primary.
///
/// A replica timeout or backend error is logged; a replica connection error
/// is expected and skipped silently. Either way the primary is asked next,
/// through the [`FailureGuard`] circuit. A successful replica read is returned
/// as is and never touches the primary or its guard.
///
/// Only reads go through here. Lock acquire and release always target the
/// primary.
#[derive(Clone)]
pub struct ReplicaReadProxy {
    primary: Arc<dyn CacheBackend>,
    replica: Option<Arc<dyn CacheBackend>>,
    guard: FailureGuard,
}

impl ReplicaReadProxy {
    pub fn new(
        primary: Arc<dyn CacheBackend>,
        replica: Option<Arc<dyn CacheBackend>>,
        guard: FailureGuard,
    ) -> Self {
        Self {
            primary,
            replica,
            guard,
        }
    }

    pub fn has_replica(&self) -> bool {
        self.replica.is_some()
    }

    /// The same routing with a different guard.
    #[must_use]
    pub fn with_guard(&self, guard: FailureGuard) -> Self {
        Self {
            primary: Arc::clone(&self.primary),
            replica: self.replica.clone(),
            guard,
        }
    }

    /// Read `key`, replica first.
    ///
    /// Errors are those of the primary read under the circuit guard; the
    /// caller decides whether to degrade them.
    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(replica) = &self.replica {
            match replica.get(key).await {
                Ok(value) => return Ok(value),
                Err(CacheError::Timeout(msg)) => {
                    error!(replica = %replica.id(), key, error = %msg, "timed out reading from replica");
                }
                Err(CacheError::Connectivity(_)) => {}
                Err(e) => {
                    error!(replica = %replica.id(), key, error = %e, "replica read failed");
                }
            }
        }

        let primary = self.primary.id();
        self.guard.circuit(&primary, || self.primary.get(key)).await
    }
}
