//! # querycache
//!
//! Read-through caching for object database queries, backed by Redis.
//!
//! ## Features
//!
//! - Transparent caching of `get`, `find`, `findAll`, `first`, `count`,
//!   `distinct`, `aggregate` and the derived iteration reads
//! - Namespace-based invalidation after writes, class-wide or scoped to a
//!   related record
//! - Single-node and cluster Redis, or an in-process backend
//! - Async-first design using tokio
//! - Health checks with retry and degraded state detection
//!
//! ## Caching reads
//!
//! Wrap any [`ObjectStore`] implementation with a [`QueryCache`]:
//!
//! ```no_run
//! use querycache::{BackendConfig, CacheConfig, ObjectStore, Query, QueryCache};
//!
//! async fn open_orders<S: ObjectStore>(store: S) -> anyhow::Result<usize> {
//!     let cache = QueryCache::init(
//!         CacheConfig::from_env()?,
//!         &BackendConfig::from_env()?,
//!     )
//!     .await?;
//!
//!     let orders = cache.wrap(store);
//!     let query = Query::new("Order").equal_to("status", "open");
//!
//!     // First call reaches the store, the second is answered by Redis
//!     let _ = orders.find(&query).await?;
//!     let open = orders.find(&query).await?;
//!     Ok(open.len())
//! }
//! ```
//!
//! ## Invalidation
//!
//! With `invalidate_on_write` enabled, a successful `save` / `destroy`
//! (single or batch) purges the namespaces the written records belong to:
//!
//! ```no_run
//! use querycache::{CacheConfig, InvalidationPolicy, QueryCache};
//!
//! # fn example() -> querycache::Result<()> {
//! let config = CacheConfig::builder()
//!     .invalidate_on_write(true)
//!     .invalidation_policy(InvalidationPolicy::scoped(["Customer"]))
//!     .build();
//! let cache = QueryCache::in_memory(config)?;
//! # Ok(())
//! # }
//! ```
//!
//! Namespaces can also be purged by hand with [`QueryCache::invalidate`].
//!
//! ## Health Check
//!
//! ```no_run
//! # use querycache::QueryCache;
//! # async fn example(cache: QueryCache) {
//! let result = cache.health_check().await;
//! if result.status.is_operational() {
//!     println!("Cache backend is operational ({}ms)", result.response_time_ms);
//! }
//! # }
//! ```

pub mod cache;
pub mod connection;
pub mod error;
pub mod model;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheKey, CacheStats, CacheStore, CachedResult, CachedStore,
    InvalidationEvent, InvalidationMode, InvalidationPolicy, InvalidationReason, KvBackend,
    MemoryBackend, Namespace, ObjectStore, QueryCache,
};
pub use connection::{
    BackendConfig, HealthCheckConfig, HealthCheckResult, HealthStatus, RedisBackend, RedisTopology,
};
pub use error::{CacheError, Result};
pub use model::{pointer, Acl, DataObject, Permission, Query, QueryOp};
