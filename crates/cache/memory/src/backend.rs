use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use dogpile_cache::backend::{CacheBackend, ConnectionId, ScriptHandle, ScriptReply};
use dogpile_cache::error::CacheError;

use crate::scripts::NativeScript;

/// Failure mode injected into every transport call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    /// Fail with [`CacheError::Connectivity`].
    Unreachable,
    /// Fail with [`CacheError::Timeout`].
    Timeout,
    /// Fail with [`CacheError::Protocol`].
    Protocol,
}

#[derive(Debug)]
pub(crate) enum Value {
    Bytes(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) value: Value,
    pub(crate) expires_at: Option<Instant>,
}

impl Entry {
    pub(crate) fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// The keyspace. Every script runs while holding the lock on it, which is
/// what makes scripts atomic here.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Live entry for `key`. Expired entries are evicted on access.
    pub(crate) fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    pub(crate) fn get_bytes(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.live(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Bytes(data)) => Ok(Some(data.clone())),
            Some(Value::List(_)) => Err(wrong_type(key)),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, entry: Entry) {
        self.entries.insert(key.to_owned(), entry);
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.entries.remove(key).is_some()
    }

    pub(crate) fn contains(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// `LPUSH`: the list at `key`, created empty if absent.
    pub(crate) fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<Vec<u8>>, CacheError> {
        self.live(key);
        let entry = match self.entries.entry(key.to_owned()) {
            MapEntry::Occupied(occupied) => occupied.into_mut(),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::List(VecDeque::new()), None))
            }
        };
        match &mut entry.value {
            Value::List(list) => Ok(list),
            Value::Bytes(_) => Err(wrong_type(key)),
        }
    }

    pub(crate) fn expire(&mut self, key: &str, ttl: Duration) {
        if let Some(entry) = self.live(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    /// `RPOPLPUSH`: move the tail of `source` to the head of `destination`.
    fn pop_push(&mut self, source: &str, destination: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let item = match self.live(source).map(|e| &mut e.value) {
            None => return Ok(None),
            Some(Value::Bytes(_)) => return Err(wrong_type(source)),
            Some(Value::List(list)) => {
                let Some(item) = list.pop_back() else {
                    return Ok(None);
                };
                if source == destination {
                    list.push_front(item.clone());
                    return Ok(Some(item));
                }
                item
            }
        };

        if self
            .live(source)
            .is_some_and(|e| matches!(&e.value, Value::List(list) if list.is_empty()))
        {
            self.entries.remove(source);
        }
        self.list_mut(destination)?.push_front(item.clone());
        Ok(Some(item))
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Protocol(format!(
        "WRONGTYPE operation against key `{key}` holding the wrong kind of value"
    ))
}

#[derive(Debug)]
struct Shared {
    id: ConnectionId,
    keyspace: Mutex<Keyspace>,
    scripts: Mutex<HashMap<String, NativeScript>>,
    pushed: Notify,
    fault: Mutex<Fault>,
    calls: AtomicU64,
}

/// In-memory [`CacheBackend`].
///
/// Strings and lists with lazy expiry, `BRPOPLPUSH` on a [`Notify`], and
/// native implementations of the bundled lock scripts. Time follows
/// [`tokio::time`], so paused-clock tests can advance through lock expiry.
///
/// Every transport call (everything except script registration) bumps
/// [`calls`](Self::calls) and fails with the injected [`Fault`], if any.
/// Clones share the same keyspace.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_id(ConnectionId::new("memory"))
    }

    /// Create a backend reporting `id` as its connection identity.
    pub fn with_id(id: ConnectionId) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                keyspace: Mutex::new(Keyspace::default()),
                scripts: Mutex::new(HashMap::new()),
                pushed: Notify::new(),
                fault: Mutex::new(Fault::None),
                calls: AtomicU64::new(0),
            }),
        }
    }

    /// Make every following transport call fail with `fault`.
    pub fn set_fault(&self, fault: Fault) {
        debug!(connection = %self.shared.id, ?fault, "injecting fault");
        *self
            .shared
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// Number of transport calls attempted so far, failed ones included.
    pub fn calls(&self) -> u64 {
        self.shared.calls.load(Ordering::SeqCst)
    }

    fn keyspace(&self) -> MutexGuard<'_, Keyspace> {
        self.shared
            .keyspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(&self) -> Result<(), CacheError> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        let fault = *self
            .shared
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match fault {
            Fault::None => Ok(()),
            Fault::Unreachable => Err(CacheError::Connectivity(format!(
                "{}: connection refused",
                self.shared.id
            ))),
            Fault::Timeout => Err(CacheError::Timeout(format!(
                "{}: response timed out",
                self.shared.id
            ))),
            Fault::Protocol => Err(CacheError::Protocol(format!(
                "{}: ERR injected failure",
                self.shared.id
            ))),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn id(&self) -> ConnectionId {
        self.shared.id.clone()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.begin_call()?;
        self.keyspace().get_bytes(key)
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.begin_call()?;
        self.keyspace()
            .insert(key, Entry::new(Value::Bytes(value.to_vec()), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.begin_call()?;
        Ok(self.keyspace().remove(key))
    }

    async fn load_script(&self, name: &str, source: &str) -> Result<ScriptHandle, CacheError> {
        let native = NativeScript::from_name(name).ok_or_else(|| {
            CacheError::Protocol(format!("no native implementation of script `{name}`"))
        })?;
        let digest = hex::encode(Sha256::digest(source.as_bytes()));
        self.shared
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest.clone(), native);
        Ok(ScriptHandle::new(name, digest))
    }

    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[&str],
        args: &[String],
    ) -> Result<ScriptReply, CacheError> {
        self.begin_call()?;
        let native = self
            .shared
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(script.digest())
            .copied()
            .ok_or_else(|| {
                CacheError::Protocol(format!(
                    "NOSCRIPT no script matching {} ({})",
                    script.digest(),
                    script.name()
                ))
            })?;

        let (reply, pushed) = {
            let mut keyspace = self.keyspace();
            native.run(&mut keyspace, keys, args)?
        };
        if pushed {
            self.shared.pushed.notify_waiters();
        }
        Ok(reply)
    }

    async fn blocking_pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        self.begin_call()?;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.shared.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.keyspace().pop_push(source, destination)?;
            if popped.is_some() {
                return Ok(popped);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
