//! Error types for cache operations
//!
//! Only `BackendUnavailable` is fatal (at initialization). The remaining
//! variants are soft: the decorating store logs them and degrades to an
//! uncached read, or drops the invalidation after retries.

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache backend could not be reached during initialization
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Read request arguments could not be canonicalized into a key
    #[error("Unserializable argument: {0}")]
    UnserializableArgument(String),

    /// Stored bytes could not be decoded into a cached result
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// Clearing a namespace failed
    #[error("Invalidation of namespace '{namespace}' failed: {reason}")]
    InvalidationFailure { namespace: String, reason: String },

    /// Backend command error (other than connection setup)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Backend operation exceeded its time bound
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Redis driver error (wrapper)
    #[error("Redis driver error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether the decorating store may carry on without the cache
    pub fn is_soft(&self) -> bool {
        !matches!(self, CacheError::BackendUnavailable(_) | CacheError::ConfigError(_))
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
