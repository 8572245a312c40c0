//! Cache store adapter with namespace indices
//!
//! Every entry is written under `"{prefix}{hash}"` and its fully qualified key
//! is appended to the index list `"{prefix}ns:{namespace}"`. Clearing a
//! namespace reads the index, deletes every listed entry in one batch and then
//! drops the index itself.

use crate::cache::backend::KvBackend;
use crate::cache::types::{CacheKey, Namespace};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Namespace-aware view over a [`KvBackend`]
///
/// The index is appended before the value is written, so an entry is never
/// live without being reachable from its namespace. The index itself carries
/// no expiry; it can list keys whose values already expired, which `clear`
/// tolerates.
///
/// A `set` racing a `clear` on the same namespace is best-effort: if the
/// append lands after the index was read but the value is written after the
/// index was dropped, that entry survives the clear until its TTL runs out.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Fully qualified backend key of an entry
    pub fn entry_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Fully qualified backend key of a namespace index
    pub fn index_key(&self, namespace: &Namespace) -> String {
        format!("{}ns:{}", self.prefix, namespace)
    }

    /// Fetch the stored bytes for a key
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        self.backend.get(&self.entry_key(key)).await
    }

    /// Check whether a live entry exists for a key
    pub async fn contains(&self, key: &CacheKey) -> Result<bool> {
        self.backend.exists(&self.entry_key(key)).await
    }

    /// Record `key` in the namespace index, then store its value with expiry
    pub async fn set(
        &self,
        namespace: &Namespace,
        key: &CacheKey,
        value: &[u8],
        ttl: Duration,
    ) -> Result<()> {
        let entry_key = self.entry_key(key);

        self.backend
            .list_push(&self.index_key(namespace), &entry_key)
            .await?;
        self.backend.set_with_expiry(&entry_key, value, ttl).await?;

        debug!(
            "Stored cache entry {} in namespace {} ({} bytes, ttl {:?})",
            key,
            namespace,
            value.len(),
            ttl
        );
        Ok(())
    }

    /// Remove every entry recorded in the namespace, then the index
    ///
    /// Returns the number of entry keys that were still present. Clearing an
    /// unknown or already cleared namespace is a no-op returning 0.
    pub async fn clear(&self, namespace: &Namespace) -> Result<usize> {
        let index_key = self.index_key(namespace);
        let mut members = self.backend.list_members(&index_key).await?;

        let removed = if members.is_empty() {
            0
        } else {
            members.sort();
            members.dedup();
            self.backend.delete(&members).await? as usize
        };

        self.backend.delete(&[index_key]).await?;

        if removed > 0 {
            info!("Cleared {} entries from namespace {}", removed, namespace);
        } else {
            debug!("Namespace {} had no live entries", namespace);
        }
        Ok(removed)
    }

    /// Entry keys currently listed in a namespace index
    pub async fn indexed_keys(&self, namespace: &Namespace) -> Result<Vec<String>> {
        self.backend.list_members(&self.index_key(namespace)).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::memory::MemoryBackend;

    fn key(n: u8) -> CacheKey {
        CacheKey::from_digest(&[n; 32])
    }

    fn store() -> CacheStore {
        let config = CacheConfig::builder().enable_auto_cleanup(false).build();
        CacheStore::new(Arc::new(MemoryBackend::new(config)), "qc:")
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = store();
        let ns = Namespace::class("Order");

        store.set(&ns, &key(1), b"payload", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get(&key(1)).await.unwrap(), Some(b"payload".to_vec()));
        assert!(store.contains(&key(1)).await.unwrap());
        assert_eq!(store.get(&key(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_layout() {
        let store = store();
        let ns = Namespace::scoped("Order", "c1");

        assert_eq!(store.index_key(&ns), "qc:ns:Order:c1");
        assert_eq!(store.entry_key(&key(1)), format!("qc:{}", key(1)));

        store.set(&ns, &key(1), b"x", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            store.indexed_keys(&ns).await.unwrap(),
            vec![store.entry_key(&key(1))]
        );
    }

    #[tokio::test]
    async fn test_clear_removes_only_that_namespace() {
        let store = store();
        let orders = Namespace::class("Order");
        let customers = Namespace::class("Customer");

        store.set(&orders, &key(1), b"a", Duration::from_secs(60)).await.unwrap();
        store.set(&orders, &key(2), b"b", Duration::from_secs(60)).await.unwrap();
        store.set(&customers, &key(3), b"c", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.clear(&orders).await.unwrap(), 2);

        assert_eq!(store.get(&key(1)).await.unwrap(), None);
        assert_eq!(store.get(&key(2)).await.unwrap(), None);
        assert_eq!(store.get(&key(3)).await.unwrap(), Some(b"c".to_vec()));
        assert!(store.indexed_keys(&orders).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = store();
        let ns = Namespace::class("Order");

        assert_eq!(store.clear(&ns).await.unwrap(), 0);

        store.set(&ns, &key(1), b"a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.clear(&ns).await.unwrap(), 1);
        assert_eq!(store.clear(&ns).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_key_is_counted_once() {
        let store = store();
        let ns = Namespace::class("Order");

        store.set(&ns, &key(1), b"a", Duration::from_secs(60)).await.unwrap();
        store.set(&ns, &key(1), b"b", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.indexed_keys(&ns).await.unwrap().len(), 2);
        assert_eq!(store.clear(&ns).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let store = store();
        let ns = Namespace::class("Order");

        store.set(&ns, &key(1), b"a", Duration::from_millis(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get(&key(1)).await.unwrap(), None);
        // Index still lists it; clearing tolerates the missing value
        assert_eq!(store.indexed_keys(&ns).await.unwrap().len(), 1);
        assert_eq!(store.clear(&ns).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prefixes_isolate_stores() {
        let config = CacheConfig::builder().enable_auto_cleanup(false).build();
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new(config));
        let a = CacheStore::new(backend.clone(), "a:");
        let b = CacheStore::new(backend, "b:");
        let ns = Namespace::class("Order");

        a.set(&ns, &key(1), b"a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(b.get(&key(1)).await.unwrap(), None);
        assert_eq!(b.clear(&ns).await.unwrap(), 0);
        assert!(a.get(&key(1)).await.unwrap().is_some());
    }
}
