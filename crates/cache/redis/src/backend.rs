//! Redis implementation of [`CacheBackend`].
//!
//! Plain commands run on a `deadpool-redis` pool. Lock scripts go through
//! [`redis::Script`], which sends `EVALSHA` and loads the body on `NOSCRIPT`,
//! so registering a script is local and a server restart is survived. Waiters
//! block with `BRPOPLPUSH` on a pooled connection held for the whole wait.
//!
//! Every command runs under the configured command timeout. Native errors
//! are classified into [`CacheError`] kinds:
//!
//! | Failure | Kind |
//! |---------|------|
//! | refused, dropped or other I/O failure | `Connectivity` |
//! | Redis or pool timeout | `Timeout` |
//! | anything else (`WRONGTYPE`, script errors, ...) | `Protocol` |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{Config, Pool, PoolError, Runtime};
use redis::{RedisError, Script, Value};
use tracing::debug;

use dogpile_cache::backend::{CacheBackend, ConnectionId, ScriptHandle, ScriptReply};
use dogpile_cache::error::CacheError;
use dogpile_cache::provision::{BackendFactory, ConnectionSettings};

use crate::config::RedisConfig;
use crate::url::connection_url;

/// Redis-backed [`CacheBackend`] for one server.
pub struct RedisBackend {
    id: ConnectionId,
    pool: Pool,
    scripts: DashMap<String, Arc<Script>>,
    command_timeout: Duration,
}

impl RedisBackend {
    /// Create a backend for `settings`. No connection is opened until the
    /// first command.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if the URL cannot be parsed or
    /// the pool cannot be built.
    pub fn new(settings: &ConnectionSettings, config: &RedisConfig) -> Result<Self, CacheError> {
        let id = settings.identity();
        let cfg = Config::from_url(connection_url(settings));
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout()))
                    .create_timeout(Some(config.connection_timeout()))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| CacheError::Configuration(format!("{id}: {e}")))?
            .map_err(|e| CacheError::Configuration(format!("{id}: {e}")))?;

        Ok(Self {
            id,
            pool,
            scripts: DashMap::new(),
            command_timeout: config.command_timeout(),
        })
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| self.classify_pool(e))
    }

    /// Await a command, bounded by `limit`.
    async fn timed<T>(
        &self,
        limit: Duration,
        command: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(limit, command).await {
            Ok(result) => result.map_err(|e| self.classify(&e)),
            Err(_) => Err(CacheError::Timeout(format!(
                "{}: no response within {limit:?}",
                self.id
            ))),
        }
    }

    fn classify(&self, e: &RedisError) -> CacheError {
        let msg = format!("{}: {e}", self.id);
        if e.is_timeout() {
            CacheError::Timeout(msg)
        } else if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            CacheError::Connectivity(msg)
        } else {
            CacheError::Protocol(msg)
        }
    }

    fn classify_pool(&self, e: PoolError) -> CacheError {
        match e {
            PoolError::Timeout(kind) => CacheError::Timeout(format!(
                "{}: pool {kind:?} timed out",
                self.id
            )),
            PoolError::Backend(e) => self.classify(&e),
            other => CacheError::Connectivity(format!("{}: {other}", self.id)),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn id(&self) -> ConnectionId {
        self.id.clone()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn().await?;
        self.timed(
            self.command_timeout,
            redis::cmd("GET").arg(key).query_async(&mut conn),
        )
        .await
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(ms);
        }

        let mut conn = self.conn().await?;
        self.timed(self.command_timeout, cmd.query_async::<()>(&mut conn))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let removed: i64 = self
            .timed(
                self.command_timeout,
                redis::cmd("DEL").arg(key).query_async(&mut conn),
            )
            .await?;
        Ok(removed > 0)
    }

    async fn load_script(&self, name: &str, source: &str) -> Result<ScriptHandle, CacheError> {
        let script = Script::new(source);
        let digest = script.get_hash().to_owned();
        self.scripts
            .entry(digest.clone())
            .or_insert_with(|| Arc::new(script));
        debug!(connection = %self.id, script = name, sha = %digest, "prepared script");
        Ok(ScriptHandle::new(name, digest))
    }

    async fn eval_script(
        &self,
        script: &ScriptHandle,
        keys: &[&str],
        args: &[String],
    ) -> Result<ScriptReply, CacheError> {
        let prepared = self
            .scripts
            .get(script.digest())
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| {
                CacheError::Protocol(format!(
                    "{}: script `{}` was not loaded on this connection",
                    self.id,
                    script.name()
                ))
            })?;

        let mut invocation = prepared.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        let mut conn = self.conn().await?;
        let value: Value = self
            .timed(self.command_timeout, invocation.invoke_async(&mut conn))
            .await?;
        Ok(script_reply(value))
    }

    async fn blocking_pop_push(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        // A zero timeout would block forever on the server.
        let wait = timeout.max(Duration::from_millis(10));
        let mut conn = self.conn().await?;
        self.timed(
            wait + self.command_timeout,
            redis::cmd("BRPOPLPUSH")
                .arg(source)
                .arg(destination)
                .arg(wait.as_secs_f64())
                .query_async(&mut conn),
        )
        .await
    }
}

fn script_reply(value: Value) -> ScriptReply {
    match value {
        Value::Nil => ScriptReply::Nil,
        Value::Int(n) => ScriptReply::Int(n),
        Value::BulkString(data) => ScriptReply::Data(data),
        Value::SimpleString(status) => ScriptReply::Status(status),
        Value::Okay => ScriptReply::Status("OK".to_owned()),
        Value::Array(items) => ScriptReply::Array(items.into_iter().map(script_reply).collect()),
        other => ScriptReply::Status(format!("{other:?}")),
    }
}

/// [`BackendFactory`] building a [`RedisBackend`] per connection setting.
#[derive(Debug, Clone, Default)]
pub struct RedisProvisioner {
    config: RedisConfig,
}

impl RedisProvisioner {
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for RedisProvisioner {
    fn connect(&self, settings: &ConnectionSettings) -> Result<Arc<dyn CacheBackend>, CacheError> {
        Ok(Arc::new(RedisBackend::new(settings, &self.config)?))
    }
}
