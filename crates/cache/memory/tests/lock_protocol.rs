//! Get-or-lock scenarios against the in-memory backend.
//!
//! These cover the contract callers rely on: one owner per key, waiters
//! receiving the owner's value, and recovery when the owner never stores
//! anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dogpile_cache::{CacheBackend, CacheClient, CacheError, DegradePolicy, LockOptions, Lookup};
use dogpile_cache_memory::MemoryBackend;
use futures::future::join_all;
use tokio::time::Instant;

fn client(backend: &MemoryBackend, options: LockOptions) -> CacheClient {
    CacheClient::new(
        Arc::new(backend.clone()),
        None,
        DegradePolicy::default(),
        options,
    )
}

// -- Ownership --

#[tokio::test]
async fn waiters_receive_the_owners_value() {
    let backend = MemoryBackend::new();
    let a = client(&backend, LockOptions::default());

    let Lookup::Acquired(owner) = a.get_or_lock("k1").await.unwrap() else {
        panic!("empty key should hand out the lock");
    };
    assert_eq!(backend.get("k1").await.unwrap().as_deref(), Some(&b"LOCK"[..]));

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let c = a.clone();
            tokio::spawn(async move { c.get_or_lock("k1").await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(waiters.iter().all(|w| !w.is_finished()));

    a.set("k1", b"42", Some(Duration::from_secs(60))).await.unwrap();
    owner.release().await.unwrap();

    for waiter in waiters {
        let lookup = waiter.await.unwrap().unwrap();
        assert_eq!(lookup.value(), Some(&b"42"[..]));
    }
}

#[tokio::test]
async fn hit_returns_without_locking() {
    let backend = MemoryBackend::new();
    let c = client(&backend, LockOptions::default());
    c.set("k", b"cached", None).await.unwrap();

    let lookup = c.get_or_lock("k").await.unwrap();
    assert_eq!(lookup.into_value(), Some(b"cached".to_vec()));
    assert_eq!(backend.get("k").await.unwrap().as_deref(), Some(&b"cached"[..]));
}

#[tokio::test]
async fn concurrent_callers_compute_once() {
    let backend = MemoryBackend::new();
    let c = client(&backend, LockOptions::default());
    let computes = AtomicU32::new(0);
    let computes = &computes;

    let results = join_all((0..10).map(|_| {
        c.get_or_compute("report", None, move || async move {
            computes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, CacheError>(b"rows".to_vec())
        })
    }))
    .await;

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), b"rows");
    }
}

#[tokio::test]
async fn waiter_takes_over_when_owner_stores_nothing() {
    let backend = MemoryBackend::new();
    let a = client(&backend, LockOptions::default());

    let Lookup::Acquired(owner) = a.get_or_lock("k").await.unwrap() else {
        panic!("first caller should own the lock");
    };
    let waiter = {
        let b = a.clone();
        tokio::spawn(async move { b.get_or_lock("k").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    owner.release().await.unwrap();
    let lookup = waiter.await.unwrap().unwrap();
    assert!(lookup.is_owner(), "released sentinel must not read as data");
    let Lookup::Acquired(next) = lookup else {
        unreachable!()
    };
    next.release().await.unwrap();
}

#[tokio::test]
async fn dropped_guard_wakes_waiters() {
    let backend = MemoryBackend::new();
    let a = client(&backend, LockOptions::default());

    let owner = a.get_or_lock("k").await.unwrap();
    assert!(owner.is_owner());
    let waiter = {
        let b = a.clone();
        tokio::spawn(async move { b.get_or_lock("k").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(owner);
    let lookup = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("drop should release the lock")
        .unwrap()
        .unwrap();
    assert!(lookup.is_owner());
}

#[tokio::test]
async fn failed_compute_releases_the_lock() {
    let backend = MemoryBackend::new();
    let c = client(&backend, LockOptions::default());

    let result = c
        .get_or_compute("k", None, || async {
            Err::<Vec<u8>, _>(CacheError::Protocol("query failed".into()))
        })
        .await;
    assert!(matches!(result, Err(CacheError::Protocol(_))));

    assert!(backend.get("k").await.unwrap().is_none());
    let woken = backend
        .blocking_pop_push("k:signal", "k:signal", Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(woken.as_deref(), Some(&b"1"[..]));
    assert!(c.get_or_lock("k").await.unwrap().is_owner());
}

#[tokio::test]
async fn computed_value_is_stored_with_ttl() {
    let backend = MemoryBackend::new();
    let c = client(&backend, LockOptions::default());

    let value = c
        .get_or_compute("k", Some(Duration::from_secs(30)), || async {
            Ok::<_, CacheError>(b"fresh".to_vec())
        })
        .await
        .unwrap();
    assert_eq!(value, b"fresh");
    assert_eq!(backend.get("k").await.unwrap().as_deref(), Some(&b"fresh"[..]));
}

// -- Expiry and deadlines --

#[tokio::test(start_paused = true)]
async fn crashed_owner_expires_after_lock_timeout() {
    let backend = MemoryBackend::new();
    let c = client(&backend, LockOptions::default());

    let Lookup::Acquired(owner) = c.get_or_lock("k").await.unwrap() else {
        panic!("first caller should own the lock");
    };
    owner.abandon();

    let started = Instant::now();
    let lookup = c.get_or_lock("k").await.unwrap();
    let waited = started.elapsed();
    assert!(lookup.is_owner(), "expired lock should be re-acquired");
    assert!(waited >= Duration::from_secs(60));
    assert!(waited < Duration::from_secs(61));
}

#[tokio::test(start_paused = true)]
async fn short_lock_timeout_bounds_each_wait() {
    let backend = MemoryBackend::new();
    let options = LockOptions {
        timeout: Duration::from_secs(2),
        ..LockOptions::default()
    };
    let c = client(&backend, options);

    let owner = c.get_or_lock("k").await.unwrap();
    let Lookup::Acquired(owner) = owner else {
        panic!("first caller should own the lock");
    };
    owner.abandon();

    let started = Instant::now();
    assert!(c.get_or_lock("k").await.unwrap().is_owner());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn wait_deadline_gives_up() {
    let backend = MemoryBackend::new();
    let options = LockOptions {
        wait_deadline: Some(Duration::from_secs(5)),
        ..LockOptions::default()
    };
    let c = client(&backend, options);

    let Lookup::Acquired(owner) = c.get_or_lock("k").await.unwrap() else {
        panic!("first caller should own the lock");
    };

    let started = Instant::now();
    let err = c.get_or_lock("k").await.unwrap_err();
    assert!(matches!(err, CacheError::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));

    owner.release().await.unwrap();
}

// -- Scripts --

#[tokio::test]
async fn stripped_scripts_behave_the_same() {
    let backend = MemoryBackend::new();
    let options = LockOptions {
        strip_scripts: true,
        ..LockOptions::default()
    };
    let c = client(&backend, options);

    let Lookup::Acquired(owner) = c.get_or_lock("k").await.unwrap() else {
        panic!("first caller should own the lock");
    };
    c.set("k", b"v", None).await.unwrap();
    owner.release().await.unwrap();
    assert_eq!(c.get_or_lock("k").await.unwrap().into_value(), Some(b"v".to_vec()));
}

#[tokio::test]
async fn plain_reads_never_return_the_lock_marker() {
    let backend = MemoryBackend::new();
    let owner_side = client(&backend, LockOptions::default());
    let reader = owner_side.clone();

    let Lookup::Acquired(owner) = owner_side.get_or_lock("k").await.unwrap() else {
        panic!("first caller should own the lock");
    };

    assert!(matches!(reader.getting("k", false).await.unwrap(), Lookup::Miss));
    assert!(reader.get("k").await.unwrap().is_none());

    owner_side.set("k", b"42", None).await.unwrap();
    owner.release().await.unwrap();
    assert_eq!(
        reader.getting("k", false).await.unwrap().into_value(),
        Some(b"42".to_vec())
    );
}

#[tokio::test]
async fn getting_without_lock_reports_a_plain_miss() {
    let backend = MemoryBackend::new();
    let c = client(&backend, LockOptions::default());

    assert!(matches!(c.getting("k", false).await.unwrap(), Lookup::Miss));
    assert!(backend.get("k").await.unwrap().is_none());

    let lookup = c.getting("k", true).await.unwrap();
    assert!(lookup.is_owner());
    if let Lookup::Acquired(owner) = lookup {
        owner.release().await.unwrap();
    }
}
