//! The cache handle
//!
//! A [`QueryCache`] owns one resolved configuration, one backend connection,
//! the invalidation worker and the counters. It is cheap to clone; clones
//! share all of it. Separate handles built from separate configurations are
//! fully independent.

use crate::cache::backend::KvBackend;
use crate::cache::config::CacheConfig;
use crate::cache::integration::{CachedStore, ObjectStore};
use crate::cache::invalidation::{InvalidationEvent, InvalidationReason, Invalidator};
use crate::cache::memory::MemoryBackend;
use crate::cache::store::CacheStore;
use crate::cache::types::{CacheStats, Namespace, StatsRecorder};
use crate::connection::{
    health_check_with_retry, BackendConfig, HealthCheckConfig, HealthCheckResult, RedisBackend,
};
use crate::error::{CacheError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Handle to a configured query cache
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    store: CacheStore,
    stats: Arc<StatsRecorder>,
    invalidator: Invalidator,
    cleanup: Option<JoinHandle<()>>,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}

impl QueryCache {
    /// Connect to Redis and start the cache
    ///
    /// Fails with [`CacheError::BackendUnavailable`] when the backend cannot
    /// be reached, and with [`CacheError::ConfigError`] for an invalid
    /// configuration. Nothing is installed when this fails.
    ///
    /// # Example
    /// ```no_run
    /// use querycache::{BackendConfig, CacheConfig, QueryCache};
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let config = CacheConfig::builder()
    ///     .ttl_ms(60_000)
    ///     .invalidate_on_write(true)
    ///     .build();
    ///
    /// let cache = QueryCache::init(config, &BackendConfig::single("redis://localhost:6379")).await?;
    /// println!("{}", cache.stats());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn init(config: CacheConfig, backend: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let redis = RedisBackend::connect(backend).await?;
        Self::with_backend(config, Arc::new(redis))
    }

    /// Start the cache over an existing backend
    ///
    /// Must be called within a tokio runtime: the invalidation worker is
    /// spawned here in background mode.
    pub fn with_backend(config: CacheConfig, backend: Arc<dyn KvBackend>) -> Result<Self> {
        Self::build(config, backend, None)
    }

    /// Start the cache over a fresh in-process backend
    ///
    /// The backend honours the LRU, stale and age options of `config` and,
    /// when enabled, runs the periodic expiry sweep.
    pub fn in_memory(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(MemoryBackend::new(config.clone()));
        let cleanup = backend.spawn_cleanup();
        Self::build(config, backend, cleanup)
    }

    fn build(
        config: CacheConfig,
        backend: Arc<dyn KvBackend>,
        cleanup: Option<JoinHandle<()>>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            "Initializing query cache (backend: {}, ttl: {:?}, invalidate_on_write: {}, policy: {:?})",
            backend.name(),
            config.ttl,
            config.invalidate_on_write,
            config.invalidation_policy
        );

        let store = CacheStore::new(backend, config.key_prefix.clone());
        let stats = Arc::new(StatsRecorder::default());
        let invalidator = Invalidator::spawn(
            store.clone(),
            Arc::clone(&stats),
            config.invalidation_mode,
            config.invalidation_retries,
            config.invalidation_retry_delay,
            config.operation_timeout,
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                store,
                stats,
                invalidator,
                cleanup,
            }),
        })
    }

    /// Decorate an object store with this cache
    pub fn wrap<S: ObjectStore>(&self, store: S) -> CachedStore<S> {
        CachedStore::new(store, self.clone())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Namespace-aware access to the backend
    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    /// Purge a class namespace, or one scoped to `scope_id`
    ///
    /// Returns the number of entries removed. Unlike write-triggered
    /// invalidation, a failure after retries is returned to the caller.
    pub async fn invalidate(&self, class_name: &str, scope_id: Option<&str>) -> Result<usize> {
        self.invalidate_namespace(&Namespace::for_class(class_name, scope_id))
            .await
    }

    pub async fn invalidate_namespace(&self, namespace: &Namespace) -> Result<usize> {
        self.inner
            .invalidator
            .clear_namespace(InvalidationReason::Manual, namespace)
            .await
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Receive an event for every namespace clear from now on
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.inner.invalidator.subscribe()
    }

    /// Wait until queued write-triggered invalidations have run
    pub async fn flush_invalidations(&self) {
        self.inner.invalidator.flush().await;
    }

    /// Ping the backend with retries
    pub async fn health_check(&self) -> HealthCheckResult {
        health_check_with_retry(
            self.inner.store.backend().as_ref(),
            &HealthCheckConfig::default(),
        )
        .await
    }

    pub(crate) fn recorder(&self) -> &StatsRecorder {
        &self.inner.stats
    }

    pub(crate) fn invalidator(&self) -> &Invalidator {
        &self.inner.invalidator
    }

    /// Run a backend call bounded by `operation_timeout`
    pub(crate) async fn bounded<T, F>(&self, context: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.inner.config.operation_timeout;
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
                context: context.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("store", &self.inner.store)
            .field("invalidator", &self.inner.invalidator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::CacheKey;
    use std::time::Duration;

    fn config() -> CacheConfig {
        CacheConfig::builder().enable_auto_cleanup(false).build()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let bad = CacheConfig::builder().max_entries(0).build();
        assert!(matches!(
            QueryCache::in_memory(bad),
            Err(CacheError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_invalidation() {
        let cache = QueryCache::in_memory(config()).unwrap();
        let key = CacheKey::from_digest(&[7; 32]);
        let scoped = Namespace::scoped("Order", "c1");

        cache
            .store()
            .set(&scoped, &key, b"v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.invalidate("Order", None).await.unwrap(), 0);
        assert_eq!(cache.invalidate("Order", Some("c1")).await.unwrap(), 1);
        assert!(cache.store().get(&key).await.unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.invalidations, 2);
        assert_eq!(stats.keys_purged, 1);
    }

    #[tokio::test]
    async fn test_handles_are_independent() {
        let a = QueryCache::in_memory(config()).unwrap();
        let b = QueryCache::in_memory(CacheConfig::builder().ttl_ms(10).build()).unwrap();

        assert_eq!(a.config().ttl, Duration::from_secs(300));
        assert_eq!(b.config().ttl, Duration::from_millis(10));

        let key = CacheKey::from_digest(&[1; 32]);
        a.store()
            .set(&Namespace::class("Order"), &key, b"v", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(b.store().get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_check_in_memory() {
        let cache = QueryCache::in_memory(config()).unwrap();
        let result = cache.health_check().await;
        assert!(result.status.is_operational());
        assert_eq!(result.backend, "memory");
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let cache = QueryCache::in_memory(
            CacheConfig::builder()
                .enable_auto_cleanup(false)
                .operation_timeout(Duration::from_millis(10))
                .build(),
        )
        .unwrap();

        let result: Result<()> = cache
            .bounded("sleep", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CacheError::Timeout { timeout_ms: 10, .. })));
    }

    #[tokio::test]
    async fn test_init_fails_without_backend() {
        let backend = BackendConfig::single("redis://127.0.0.1:1")
            .with_connect_timeout(Duration::from_millis(500));
        let result = QueryCache::init(config(), &backend).await;
        assert!(matches!(result, Err(CacheError::BackendUnavailable(_))));
    }
}
