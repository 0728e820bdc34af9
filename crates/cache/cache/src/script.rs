//! Named server-side scripts.
//!
//! Script bodies are static resources looked up by name through a
//! [`ScriptSource`]. The bundled sources ([`EmbeddedScripts`]) carry a
//! documentation block between `TOSTRIP` and `/TOSTRIP` markers that can be
//! removed before registration with [`strip_docs`].
//!
//! [`ScriptRegistry`] registers each `(name, strip)` variant with the backend
//! at most once and hands out the cached [`ScriptHandle`] afterwards.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::backend::{CacheBackend, ScriptHandle};
use crate::error::CacheError;

/// Name of the script that takes the dog-pile lock.
pub const ACQUIRE_LOCK: &str = "acquire_lock";

/// Name of the script that clears the lock and wakes waiters.
pub const RELEASE_LOCK: &str = "release_lock";

/// Matches everything from the first `TOSTRIP` to the last `/TOSTRIP`.
static STRIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)TOSTRIP.*/TOSTRIP").expect("strip regex is valid"));

/// Lookup of script bodies by resource name.
pub trait ScriptSource: Send + Sync {
    /// Return the body of the script `name`, or `None` if there is no such
    /// resource.
    fn source(&self, name: &str) -> Option<String>;
}

/// The scripts bundled with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedScripts;

impl ScriptSource for EmbeddedScripts {
    fn source(&self, name: &str) -> Option<String> {
        let body = match name {
            ACQUIRE_LOCK => include_str!("../lua/acquire_lock.lua"),
            RELEASE_LOCK => include_str!("../lua/release_lock.lua"),
            _ => return None,
        };
        Some(body.to_owned())
    }
}

/// Remove the delimited documentation block from a script body.
pub fn strip_docs(code: &str) -> String {
    STRIP_RE.replace(code, "").into_owned()
}

/// Load-once registry of script handles, keyed by `(name, strip)`.
///
/// A failed registration is not cached, so a transient backend error is
/// retried on the next [`load`](Self::load). A missing resource surfaces as
/// [`CacheError::Configuration`].
pub struct ScriptRegistry {
    backend: Arc<dyn CacheBackend>,
    source: Arc<dyn ScriptSource>,
    handles: DashMap<(String, bool), Arc<OnceCell<ScriptHandle>>>,
}

impl ScriptRegistry {
    /// Create a registry that registers scripts from `source` on `backend`.
    pub fn new(backend: Arc<dyn CacheBackend>, source: Arc<dyn ScriptSource>) -> Self {
        Self {
            backend,
            source,
            handles: DashMap::new(),
        }
    }

    /// Create a registry over the bundled [`EmbeddedScripts`].
    pub fn embedded(backend: Arc<dyn CacheBackend>) -> Self {
        Self::new(backend, Arc::new(EmbeddedScripts))
    }

    /// Return the handle for script `name`, registering it on first use.
    pub async fn load(&self, name: &str, strip: bool) -> Result<ScriptHandle, CacheError> {
        let cell = Arc::clone(&self.handles.entry((name.to_owned(), strip)).or_default());

        let handle = cell
            .get_or_try_init(|| async {
                let code = self.source.source(name).ok_or_else(|| {
                    CacheError::Configuration(format!("script resource `{name}` not found"))
                })?;
                let code = if strip { strip_docs(&code) } else { code };
                debug!(script = name, strip, "registering script");
                self.backend.load_script(name, &code).await
            })
            .await?;

        Ok(handle.clone())
    }
}
