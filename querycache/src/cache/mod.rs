//! # Query Result Caching Layer
//!
//! Read results of an object database are cached in a key-value backend and
//! purged when the underlying records are written.
//!
//! ## Features
//!
//! - **Deterministic keys**: SHA-256 of the canonical `{args, class, op, query}` form
//! - **Namespace indices**: every entry is listed under the namespace it can be purged by
//! - **Class-wide or scoped invalidation** after save / destroy
//! - **Background invalidation** with bounded retries and an event stream
//! - **Pluggable backends**: Redis (single node or cluster) and in-process memory
//! - **Fail-open reads**: any cache fault degrades to a plain store read
//!
//! ## Architecture
//!
//! - [`key`]: key derivation
//! - [`entry`]: entry codec
//! - [`store`]: namespace-aware adapter over a [`KvBackend`]
//! - [`invalidation`]: policy and worker
//! - [`integration`]: the [`CachedStore`] decorator
//!
//! ## Example
//!
//! ```rust
//! use querycache::{CacheConfig, InvalidationPolicy, QueryCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .ttl_ms(60_000)
//!     .invalidate_on_write(true)
//!     .invalidation_policy(InvalidationPolicy::scoped(["Customer"]))
//!     .build();
//!
//! let cache = QueryCache::in_memory(config)?;
//! // let orders = cache.wrap(my_store);
//! // orders.find(&Query::new("Order").equal_to("Customer", "c1")).await?;
//! println!("{}", cache.stats());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod entry;
pub mod integration;
pub mod invalidation;
pub mod key;
pub mod memory;
pub mod query_cache;
pub mod store;
pub mod types;

pub use backend::KvBackend;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{decode, encode, CachedResult, ENTRY_FORMAT_VERSION};
pub use integration::{CachedStore, ObjectStore};
pub use invalidation::{
    InvalidationEvent, InvalidationMode, InvalidationPolicy, InvalidationReason, Invalidator,
};
pub use key::{canonicalize, derive_key, derive_query_key};
pub use memory::{MemoryBackend, MemoryStats};
pub use query_cache::QueryCache;
pub use store::CacheStore;
pub use types::{CacheKey, CacheStats, Namespace};
