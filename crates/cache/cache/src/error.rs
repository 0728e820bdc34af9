use thiserror::Error;

use crate::backend::ConnectionId;

/// Errors from cache backend, lock and provisioning operations.
///
/// Only [`Connectivity`](CacheError::Connectivity) and
/// [`Timeout`](CacheError::Timeout) are transient; see
/// [`is_degradable`](CacheError::is_degradable).
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The backend is unreachable or refused the connection.
    #[error("connection error: {0}")]
    Connectivity(String),

    /// A backend call exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Malformed response or any other error reported by the backend.
    #[error("backend error: {0}")]
    Protocol(String),

    /// The call was short-circuited because the connection was already
    /// marked degraded in the current scope. No network call was made.
    #[error("client {0} is degraded for the current scope")]
    DegradedClient(ConnectionId),

    /// A required setting or static resource is missing.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Whether this failure may be absorbed into a cache miss.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_))
    }
}
