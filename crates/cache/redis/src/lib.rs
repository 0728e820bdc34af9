//! Redis cache backend for dogpile.
//!
//! This crate provides [`RedisBackend`], a Redis implementation of the
//! [`CacheBackend`] trait from `dogpile-cache`, and [`RedisProvisioner`],
//! which builds one per connection setting for lazily provisioned clients.
//!
//! # Features
//!
//! - **Plain values**: `GET`, `SET` with optional `PX` expiry, `DEL`.
//! - **Lock scripts**: `EVALSHA` with automatic `SCRIPT LOAD` on `NOSCRIPT`.
//! - **Waiting**: `BRPOPLPUSH` on the per-key signal list.
//! - **Connection pooling**: Uses `deadpool-redis` for connection management.
//!
//! # Lock Consistency
//!
//! The cache lock is a stampede guard, not a mutual exclusion primitive. It
//! has no owner token and its sentinel can be lost in a Sentinel or Cluster
//! failover, in which case two callers may compute the same value. Waiters
//! always re-contend after at most one lock timeout.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dogpile_cache::{CacheClient, CacheConfig};
//! use dogpile_cache_redis::{RedisConfig, RedisProvisioner};
//!
//! let config = CacheConfig::from_toml_str(r#"redis = "redis://localhost:6379/0""#)?;
//! let provisioner = RedisProvisioner::new(RedisConfig::default());
//! let client = CacheClient::from_config(&config, Arc::new(provisioner))?;
//! ```
//!
//! [`CacheBackend`]: dogpile_cache::CacheBackend

mod backend;
mod config;
mod url;

pub use backend::{RedisBackend, RedisProvisioner};
pub use config::RedisConfig;
