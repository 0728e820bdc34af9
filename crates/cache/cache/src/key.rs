/// Marker stored at a cache key while its value is being computed.
///
/// Must match the literal used by the `acquire_lock` and `release_lock`
/// scripts.
pub const LOCK_SENTINEL: &[u8] = b"LOCK";

/// Suffix appended to a cache key to form its signal key.
pub const SIGNAL_SUFFIX: &str = ":signal";

/// Render the signal key used to wake waiters blocked on `key`.
///
/// The signal key only ever holds a wake-up list, never cached data.
pub fn signal_key(key: &str) -> String {
    format!("{key}{SIGNAL_SUFFIX}")
}

/// Whether a stored value is the in-flight lock marker rather than data.
pub fn is_lock_sentinel(value: &[u8]) -> bool {
    value == LOCK_SENTINEL
}
