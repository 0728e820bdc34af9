use std::time::Duration;

use dogpile_cache::backend::ScriptReply;
use dogpile_cache::error::CacheError;
use dogpile_cache::key::{LOCK_SENTINEL, is_lock_sentinel};
use dogpile_cache::script::{ACQUIRE_LOCK, RELEASE_LOCK};

use crate::backend::{Entry, Keyspace, Value};

/// How long the signal list survives a release push.
const SIGNAL_TTL: Duration = Duration::from_secs(1);

/// Rust implementations of the bundled Lua scripts, selected by script name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeScript {
    AcquireLock,
    ReleaseLock,
}

impl NativeScript {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            ACQUIRE_LOCK => Some(Self::AcquireLock),
            RELEASE_LOCK => Some(Self::ReleaseLock),
            _ => None,
        }
    }

    /// Run against the locked keyspace. The flag tells the caller whether a
    /// list push happened, so blocked poppers must be woken.
    pub(crate) fn run(
        self,
        keyspace: &mut Keyspace,
        keys: &[&str],
        args: &[String],
    ) -> Result<(ScriptReply, bool), CacheError> {
        let [key, signal] = keys else {
            return Err(CacheError::Protocol(format!(
                "ERR wrong number of keys: expected 2, got {}",
                keys.len()
            )));
        };

        match self {
            Self::AcquireLock => {
                let seconds = args
                    .first()
                    .and_then(|a| a.parse::<u64>().ok())
                    .filter(|s| *s > 0)
                    .ok_or_else(|| {
                        CacheError::Protocol("ERR invalid expire time in 'set' command".into())
                    })?;

                if keyspace.contains(key) {
                    return Ok((ScriptReply::Nil, false));
                }
                keyspace.insert(
                    key,
                    Entry::new(
                        Value::Bytes(LOCK_SENTINEL.to_vec()),
                        Some(Duration::from_secs(seconds)),
                    ),
                );
                keyspace.remove(signal);
                Ok((ScriptReply::Status("OK".into()), false))
            }
            Self::ReleaseLock => {
                if keyspace.get_bytes(key)?.is_some_and(|v| is_lock_sentinel(&v)) {
                    keyspace.remove(key);
                }
                keyspace.list_mut(signal)?.push_front(b"1".to_vec());
                keyspace.expire(signal, SIGNAL_TTL);
                Ok((ScriptReply::Nil, true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_set_if_absent() {
        let mut keyspace = Keyspace::default();
        let args = ["60".to_owned()];

        let (reply, _) = NativeScript::AcquireLock
            .run(&mut keyspace, &["k", "k:signal"], &args)
            .unwrap();
        assert_eq!(reply, ScriptReply::Status("OK".into()));
        assert_eq!(keyspace.get_bytes("k").unwrap().as_deref(), Some(LOCK_SENTINEL));

        let (reply, _) = NativeScript::AcquireLock
            .run(&mut keyspace, &["k", "k:signal"], &args)
            .unwrap();
        assert_eq!(reply, ScriptReply::Nil);
    }

    #[tokio::test]
    async fn acquire_rejects_bad_expiry() {
        let mut keyspace = Keyspace::default();
        for args in [vec![], vec!["0".to_owned()], vec!["soon".to_owned()]] {
            let result = NativeScript::AcquireLock.run(&mut keyspace, &["k", "k:signal"], &args);
            assert!(matches!(result, Err(CacheError::Protocol(_))));
        }
    }

    #[tokio::test]
    async fn scripts_need_two_keys() {
        let mut keyspace = Keyspace::default();
        let result = NativeScript::ReleaseLock.run(&mut keyspace, &["k"], &[]);
        assert!(matches!(result, Err(CacheError::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn release_signal_expires() {
        let mut keyspace = Keyspace::default();
        let (_, pushed) = NativeScript::ReleaseLock
            .run(&mut keyspace, &["k", "k:signal"], &[])
            .unwrap();
        assert!(pushed);
        assert!(keyspace.contains("k:signal"));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(!keyspace.contains("k:signal"));
    }

    #[tokio::test]
    async fn release_on_wrong_type_key_fails() {
        let mut keyspace = Keyspace::default();
        keyspace
            .list_mut("k")
            .unwrap()
            .push_front(b"LOCK".to_vec());
        let result = NativeScript::ReleaseLock.run(&mut keyspace, &["k", "k:signal"], &[]);
        assert!(matches!(result, Err(CacheError::Protocol(ref m)) if m.starts_with("WRONGTYPE")));
        // Nothing was pushed.
        assert!(!keyspace.contains("k:signal"));
    }

    #[tokio::test]
    async fn release_on_wrong_type_signal_fails() {
        let mut keyspace = Keyspace::default();
        keyspace.insert("k:signal", Entry::new(Value::Bytes(b"x".to_vec()), None));
        let result = NativeScript::ReleaseLock.run(&mut keyspace, &["k", "k:signal"], &[]);
        assert!(matches!(result, Err(CacheError::Protocol(_))));
    }
}
