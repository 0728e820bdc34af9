use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dogpile_cache::backend::{CacheBackend, ConnectionId};
use dogpile_cache::error::CacheError;
use dogpile_cache::provision::{BackendFactory, ConnectionSettings};

use crate::backend::MemoryBackend;

/// [`BackendFactory`] handing out one [`MemoryBackend`] per connection
/// identity.
///
/// Connecting twice with equivalent settings returns the same keyspace, the
/// way two clients pointed at one server see the same data.
#[derive(Debug, Default)]
pub struct MemoryProvisioner {
    backends: Mutex<HashMap<ConnectionId, MemoryBackend>>,
    connects: AtomicU32,
}

impl MemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend built for `settings`, creating it if needed, without
    /// counting a connect.
    pub fn backend(&self, settings: &ConnectionSettings) -> MemoryBackend {
        self.backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(settings.identity())
            .or_insert_with_key(|id| MemoryBackend::with_id(id.clone()))
            .clone()
    }

    /// Number of times [`connect`](BackendFactory::connect) was called.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl BackendFactory for MemoryProvisioner {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn CacheBackend>, CacheError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.backend(settings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_identity_shares_a_backend() {
        let provisioner = MemoryProvisioner::new();
        let a = provisioner
            .connect(&ConnectionSettings::Url("redis://user:pw@cache:6379/0".into()))
            .unwrap();
        let b = provisioner
            .connect(&ConnectionSettings::Url("redis://cache:6379/0".into()))
            .unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(provisioner.connects(), 2);
        assert_eq!(provisioner.backends.lock().unwrap().len(), 1);
    }
}
