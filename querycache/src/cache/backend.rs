//! Key-value backend abstraction
//!
//! The cache store adapter needs very little from a backend: byte values with
//! expiry, append-only string lists for the namespace indices, and a batched
//! delete. Keys passed in are already fully qualified (prefix applied).

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Storage primitives the cache layer relies on
///
/// Implementations must be safe to share across tasks. Per-key atomicity is
/// the only coordination the cache layer expects.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch a value, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`
    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Check presence of a live value
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Append a member to a list, creating it when missing
    async fn list_push(&self, list: &str, member: &str) -> Result<()>;

    /// Read every member of a list (empty when missing)
    async fn list_members(&self, list: &str) -> Result<Vec<String>>;

    /// Delete keys (values or lists); returns how many existed
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Round-trip to the backend
    async fn ping(&self) -> Result<()>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}
