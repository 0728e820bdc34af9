use std::sync::Arc;
use std::time::Duration;

use crate::backend::{CacheBackend, ScriptReply};
use crate::error::CacheError;
use crate::guard::{DegradePolicy, DegradeScope, FailureGuard};
use crate::key::{LOCK_SENTINEL, signal_key};
use crate::lock::{CacheLock, LockOptions, Lookup};
use crate::replica::ReplicaReadProxy;
use crate::script::{ACQUIRE_LOCK, RELEASE_LOCK, ScriptRegistry};

fn test_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Run the full backend conformance test suite.
///
/// Call this from your backend's test module with a fresh backend and a
/// namespace no other test run uses.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_backend_conformance_tests(
    backend: Arc<dyn CacheBackend>,
    namespace: &str,
) -> Result<(), CacheError> {
    test_get_missing(backend.as_ref(), namespace).await?;
    test_set_and_get(backend.as_ref(), namespace).await?;
    test_set_with_ttl(backend.as_ref(), namespace).await?;
    test_delete(backend.as_ref(), namespace).await?;
    test_blocking_pop_push_times_out(backend.as_ref(), namespace).await?;
    test_acquire_script(Arc::clone(&backend), namespace).await?;
    test_release_script(Arc::clone(&backend), namespace).await?;
    test_release_keeps_real_data(Arc::clone(&backend), namespace).await?;
    test_lock_round_trip(backend, namespace).await?;
    Ok(())
}

async fn test_get_missing(backend: &dyn CacheBackend, ns: &str) -> Result<(), CacheError> {
    let val = backend.get(&test_key(ns, "missing")).await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(backend: &dyn CacheBackend, ns: &str) -> Result<(), CacheError> {
    let key = test_key(ns, "set-get");
    backend.set(&key, b"hello", None).await?;
    assert_eq!(backend.get(&key).await?.as_deref(), Some(&b"hello"[..]));

    backend.set(&key, b"world", None).await?;
    assert_eq!(backend.get(&key).await?.as_deref(), Some(&b"world"[..]));
    Ok(())
}

async fn test_set_with_ttl(backend: &dyn CacheBackend, ns: &str) -> Result<(), CacheError> {
    let key = test_key(ns, "ttl");
    backend
        .set(&key, b"ephemeral", Some(Duration::from_secs(3600)))
        .await?;
    assert_eq!(backend.get(&key).await?.as_deref(), Some(&b"ephemeral"[..]));
    Ok(())
}

async fn test_delete(backend: &dyn CacheBackend, ns: &str) -> Result<(), CacheError> {
    let key = test_key(ns, "delete");
    backend.set(&key, b"v", None).await?;
    assert!(backend.delete(&key).await?, "delete of existing key");
    assert!(!backend.delete(&key).await?, "delete of missing key");
    assert!(backend.get(&key).await?.is_none());
    Ok(())
}

async fn test_blocking_pop_push_times_out(
    backend: &dyn CacheBackend,
    ns: &str,
) -> Result<(), CacheError> {
    let key = test_key(ns, "empty-signal");
    let popped = backend
        .blocking_pop_push(&key, &key, Duration::from_millis(200))
        .await?;
    assert!(popped.is_none(), "empty list should time out");
    Ok(())
}

async fn test_acquire_script(backend: Arc<dyn CacheBackend>, ns: &str) -> Result<(), CacheError> {
    let registry = ScriptRegistry::embedded(Arc::clone(&backend));
    let acquire = registry.load(ACQUIRE_LOCK, false).await?;
    let key = test_key(ns, "acquire");
    let signal = signal_key(&key);
    let keys = [key.as_str(), signal.as_str()];
    let args = ["60".to_owned()];

    // A stale wake-up from an earlier cycle.
    let release = registry.load(RELEASE_LOCK, false).await?;
    backend.eval_script(&release, &keys, &[]).await?;

    let first = backend.eval_script(&acquire, &keys, &args).await?;
    assert!(first.is_truthy(), "first acquire should win");
    assert_eq!(backend.get(&key).await?.as_deref(), Some(LOCK_SENTINEL));

    let popped = backend
        .blocking_pop_push(&signal, &signal, Duration::from_millis(200))
        .await?;
    assert!(popped.is_none(), "acquire should clear stale signals");

    let second = backend.eval_script(&acquire, &keys, &args).await?;
    assert_eq!(second, ScriptReply::Nil, "second acquire should lose");
    Ok(())
}

async fn test_release_script(backend: Arc<dyn CacheBackend>, ns: &str) -> Result<(), CacheError> {
    let registry = ScriptRegistry::embedded(Arc::clone(&backend));
    let acquire = registry.load(ACQUIRE_LOCK, true).await?;
    let release = registry.load(RELEASE_LOCK, true).await?;
    let key = test_key(ns, "release");
    let signal = signal_key(&key);
    let keys = [key.as_str(), signal.as_str()];

    backend
        .eval_script(&acquire, &keys, &["60".to_owned()])
        .await?;
    backend.eval_script(&release, &keys, &[]).await?;

    assert!(backend.get(&key).await?.is_none(), "sentinel should be cleared");

    // The token is requeued, so every waiter sees it.
    for _ in 0..3 {
        let popped = backend
            .blocking_pop_push(&signal, &signal, Duration::from_secs(1))
            .await?;
        assert_eq!(popped.as_deref(), Some(&b"1"[..]));
    }
    Ok(())
}

async fn test_release_keeps_real_data(
    backend: Arc<dyn CacheBackend>,
    ns: &str,
) -> Result<(), CacheError> {
    let registry = ScriptRegistry::embedded(Arc::clone(&backend));
    let release = registry.load(RELEASE_LOCK, false).await?;
    let key = test_key(ns, "release-data");
    let signal = signal_key(&key);
    let keys = [key.as_str(), signal.as_str()];

    backend.set(&key, b"42", None).await?;
    backend.eval_script(&release, &keys, &[]).await?;
    assert_eq!(backend.get(&key).await?.as_deref(), Some(&b"42"[..]));
    Ok(())
}

async fn test_lock_round_trip(backend: Arc<dyn CacheBackend>, ns: &str) -> Result<(), CacheError> {
    let guard = FailureGuard::new(DegradePolicy::default(), DegradeScope::new());
    let reader = ReplicaReadProxy::new(Arc::clone(&backend), None, guard.clone());
    let scripts = Arc::new(ScriptRegistry::embedded(Arc::clone(&backend)));
    let lock = CacheLock::new(
        Arc::clone(&backend),
        reader,
        scripts,
        guard,
        LockOptions::default(),
    );
    let key = test_key(ns, "round-trip");

    let Lookup::Acquired(owner) = lock.get_or_lock(&key).await? else {
        panic!("first caller should own the lock");
    };
    backend.set(&key, b"42", Some(Duration::from_secs(60))).await?;
    owner.release().await?;

    let lookup = lock.get_or_lock(&key).await?;
    assert_eq!(lookup.into_value().as_deref(), Some(&b"42"[..]));

    // Releasing without storing clears the sentinel; the next caller owns.
    let other = test_key(ns, "round-trip-empty");
    let Lookup::Acquired(owner) = lock.get_or_lock(&other).await? else {
        panic!("first caller should own the lock");
    };
    owner.release().await?;
    let again = lock.get_or_lock(&other).await?;
    assert!(again.is_owner(), "released sentinel must not read as data");
    if let Lookup::Acquired(owner) = again {
        owner.release().await?;
    }
    Ok(())
}
