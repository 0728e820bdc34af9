//! In-memory cache backend for dogpile.
//!
//! [`MemoryBackend`] implements [`CacheBackend`] inside the process, with the
//! bundled lock scripts implemented natively. It is meant for tests and
//! single-process development: it can inject connectivity, timeout and
//! protocol failures and counts every transport call, which makes the
//! degrade and circuit behavior of the client observable.
//!
//! [`MemoryProvisioner`] plugs it into lazily provisioned clients built with
//! [`CacheClient::from_config`].
//!
//! [`CacheBackend`]: dogpile_cache::CacheBackend
//! [`CacheClient::from_config`]: dogpile_cache::CacheClient::from_config

mod backend;
mod provision;
mod scripts;

pub use backend::{Fault, MemoryBackend};
pub use provision::MemoryProvisioner;
