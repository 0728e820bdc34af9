use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Identity of a backend connection.
///
/// Used as the key of the degraded-connection set, so two handles pointing at
/// the same server with the same settings share one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Create a connection identity from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Return the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A script registered with a backend, ready to be invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptHandle {
    name: Arc<str>,
    digest: Arc<str>,
}

impl ScriptHandle {
    /// Create a handle for the script `name` whose body hashes to `digest`.
    pub fn new(name: impl Into<Arc<str>>, digest: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
        }
    }

    /// The resource name the script was loaded from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend-specific digest of the script body (SHA1 for Redis).
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Value returned by a server-side script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    /// Lua `nil` or `false`.
    Nil,
    Int(i64),
    Data(Vec<u8>),
    /// A status reply such as the `OK` produced by a successful `SET`.
    Status(String),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    /// Lua truthiness as seen from the client: everything except `nil`/`false`
    /// (and the integer `0` that Redis uses for booleans) is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Int(n) => *n != 0,
            Self::Data(_) | Self::Status(_) | Self::Array(_) => true,
        }
    }
}

/// A key/value store with server-side scripting.
///
/// Implementations must be `Send + Sync` and safe for concurrent independent
/// calls; the backend itself serializes conflicting operations.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Identity of the underlying connection.
    fn id(&self) -> ConnectionId;

    /// Get the value stored at `key`. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` at `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Delete `key`. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Register a script body under `name`.
    ///
    /// Registration must not need a round trip: backends that cache scripts
    /// server-side load them on first invocation.
    async fn load_script(&self, name: &str, source: &str) -> Result<ScriptHandle, CacheError>;

    /// Run a registered script atomically.
    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[&str],
        args: &[String],
    ) -> Result<ScriptReply, CacheError>;

    /// Block until an element can be popped from the tail of `source`, push it
    /// onto the head of `destination` and return it. Returns `None` once
    /// `timeout` elapses with `source` still empty.
    async fn blocking_pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, CacheError>;
}
