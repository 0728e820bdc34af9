//! Stampede-safe read-through cache client.
//!
//! Given a cache key, [`CacheClient::get_or_lock`] returns the cached value
//! if there is one. On a miss exactly one caller is handed the lock and asked
//! to compute the value, while every other concurrent caller for the same key
//! waits and then receives the freshly stored value instead of recomputing
//! it.
//!
//! # Features
//!
//! - **Get-or-lock**: mutual exclusion per key through atomic server-side
//!   scripts, with waiters blocking on a per-key signal list ([`lock`]).
//! - **Failure degradation**: connectivity and timeout failures can be
//!   absorbed into cache misses, and a failed connection can be skipped for
//!   the rest of a unit of work ([`guard`]).
//! - **Replica reads**: plain lookups go to a read replica first and fall
//!   back to the primary ([`ReplicaReadProxy`]).
//! - **Lazy connections**: backends are built on first use from
//!   configuration ([`LazyBackend`]).
//!
//! Backends live in separate crates (`dogpile-cache-redis`,
//! `dogpile-cache-memory`) and implement [`CacheBackend`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dogpile_cache::{CacheClient, CacheConfig, Lookup};
//! use dogpile_cache_redis::RedisProvisioner;
//!
//! let config = CacheConfig::load("cache.toml".as_ref())?;
//! let client = CacheClient::from_config(&config, Arc::new(RedisProvisioner::default()))?;
//!
//! match client.get_or_lock("q:users:42").await? {
//!     Lookup::Hit(data) => use_it(data),
//!     Lookup::Acquired(guard) => {
//!         let data = compute();
//!         client.set("q:users:42", &data, Some(ttl)).await?;
//!         guard.release().await?;
//!     }
//!     Lookup::Miss | Lookup::Degraded => use_it(compute()),
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod key;
pub mod lock;
pub mod provision;
pub mod replica;
pub mod script;
pub mod testing;

pub use backend::{CacheBackend, ConnectionId, ScriptHandle, ScriptReply};
pub use client::CacheClient;
pub use config::CacheConfig;
pub use error::CacheError;
pub use guard::{DegradePolicy, DegradeScope, FailureGuard};
pub use key::{LOCK_SENTINEL, signal_key};
pub use lock::{CacheLock, LockGuard, LockOptions, Lookup};
pub use provision::{BackendFactory, ConnectionParams, ConnectionSettings, LazyBackend};
pub use replica::ReplicaReadProxy;
pub use script::{EmbeddedScripts, ScriptRegistry, ScriptSource};
