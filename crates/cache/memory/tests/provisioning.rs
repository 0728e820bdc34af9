//! Lazy connection provisioning and script registration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dogpile_cache::script::{ACQUIRE_LOCK, RELEASE_LOCK};
use dogpile_cache::{
    CacheBackend, CacheClient, CacheConfig, CacheError, ConnectionSettings, EmbeddedScripts,
    ScriptRegistry, ScriptSource,
};
use dogpile_cache_memory::{MemoryBackend, MemoryProvisioner};
use futures::future::join_all;

// -- Lazy provisioning --

#[tokio::test]
async fn missing_redis_setting_fails_on_first_use() {
    let config = CacheConfig::from_toml_str("degrade_on_failure = true").unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let c = CacheClient::from_config(&config, Arc::clone(&provisioner) as _).unwrap();
    assert_eq!(provisioner.connects(), 0);

    let err = c.get("k").await.unwrap_err();
    assert!(
        matches!(err, CacheError::Configuration(ref m) if m.contains("`redis`")),
        "got {err}"
    );
    assert!(matches!(
        c.get_or_lock("k").await,
        Err(CacheError::Configuration(_))
    ));
    assert_eq!(provisioner.connects(), 0);
}

#[tokio::test]
async fn connection_is_built_once_on_first_use() {
    let config = CacheConfig::from_toml_str(r#"redis = "redis://cache:6379/0""#).unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let c = CacheClient::from_config(&config, Arc::clone(&provisioner) as _).unwrap();
    assert_eq!(provisioner.connects(), 0);

    c.set("k", b"v", None).await.unwrap();
    assert_eq!(c.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
    assert!(c.get_or_lock("k").await.unwrap().value().is_some());
    assert_eq!(provisioner.connects(), 1);

    let settings = ConnectionSettings::Url("redis://cache:6379/0".into());
    let stored = provisioner.backend(&settings).get("k").await.unwrap();
    assert_eq!(stored.as_deref(), Some(&b"v"[..]));
}

#[tokio::test]
async fn replica_is_provisioned_from_its_own_setting() {
    let config = CacheConfig::from_toml_str(
        r#"
        redis = "redis://primary:6379/0"

        [replica]
        host = "replica"
        "#,
    )
    .unwrap();
    let provisioner = Arc::new(MemoryProvisioner::new());
    let c = CacheClient::from_config(&config, Arc::clone(&provisioner) as _).unwrap();

    let replica = provisioner.backend(config.replica.as_ref().unwrap());
    replica.set("k", b"from-replica", None).await.unwrap();

    assert_eq!(
        c.get("k").await.unwrap().as_deref(),
        Some(&b"from-replica"[..])
    );
    // Only the replica was needed.
    assert_eq!(provisioner.connects(), 1);
}

#[test]
fn invalid_lock_timeout_is_rejected_up_front() {
    let config = CacheConfig {
        lock_timeout_seconds: 0,
        ..CacheConfig::default()
    };
    let result = CacheClient::from_config(&config, Arc::new(MemoryProvisioner::new()));
    assert!(matches!(result, Err(CacheError::Configuration(_))));
}

// -- Script registration --

/// Serves the bundled scripts, counting lookups, and can pretend a
/// resource is missing.
#[derive(Default)]
struct CountingSource {
    lookups: AtomicU32,
    hide_acquire: AtomicBool,
}

impl ScriptSource for CountingSource {
    fn source(&self, name: &str) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if name == ACQUIRE_LOCK && self.hide_acquire.load(Ordering::SeqCst) {
            return None;
        }
        EmbeddedScripts.source(name)
    }
}

#[tokio::test]
async fn scripts_register_once_per_variant() {
    let source = Arc::new(CountingSource::default());
    let registry = ScriptRegistry::new(
        Arc::new(MemoryBackend::new()),
        Arc::clone(&source) as Arc<dyn ScriptSource>,
    );

    let handles = join_all((0..5).map(|_| registry.load(ACQUIRE_LOCK, false))).await;
    let first = handles[0].as_ref().unwrap().clone();
    assert!(handles.iter().all(|h| h.as_ref().unwrap() == &first));
    assert_eq!(source.lookups.load(Ordering::SeqCst), 1);

    let stripped = registry.load(ACQUIRE_LOCK, true).await.unwrap();
    assert_ne!(stripped.digest(), first.digest());
    assert_eq!(stripped.name(), ACQUIRE_LOCK);

    registry.load(RELEASE_LOCK, false).await.unwrap();
    registry.load(ACQUIRE_LOCK, true).await.unwrap();
    assert_eq!(source.lookups.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_script_is_a_configuration_error_and_not_cached() {
    let source = Arc::new(CountingSource::default());
    source.hide_acquire.store(true, Ordering::SeqCst);
    let registry = ScriptRegistry::new(
        Arc::new(MemoryBackend::new()),
        Arc::clone(&source) as Arc<dyn ScriptSource>,
    );

    let err = registry.load(ACQUIRE_LOCK, false).await.unwrap_err();
    assert!(matches!(err, CacheError::Configuration(ref m) if m.contains(ACQUIRE_LOCK)));

    source.hide_acquire.store(false, Ordering::SeqCst);
    assert!(registry.load(ACQUIRE_LOCK, false).await.is_ok());
    assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
}
