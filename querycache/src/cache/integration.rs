//! Integration with the object store
//!
//! [`CachedStore`] decorates any [`ObjectStore`]: reads are answered from the
//! cache when possible and populated on a miss, writes go straight to the
//! store and then trigger invalidation. The store stays the source of truth;
//! cache faults are logged, counted and otherwise invisible to callers.

use crate::cache::entry::{self, CachedResult};
use crate::cache::invalidation::InvalidationReason;
use crate::cache::key::derive_query_key;
use crate::cache::query_cache::QueryCache;
use crate::cache::types::{CacheKey, Namespace};
use crate::error::Result;
use crate::model::{DataObject, Query, QueryOp};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;
use tracing::{debug, warn};

const NO_ARGS: &[JsonValue] = &[];

/// Object database client the cache sits in front of
///
/// Errors are the store's own and pass through the decorator unchanged.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch one record by id
    async fn get(
        &self,
        class_name: &str,
        object_id: &str,
    ) -> std::result::Result<Option<DataObject>, Self::Error>;

    /// Records matching the query, honouring `limit` / `skip`
    async fn find(&self, query: &Query) -> std::result::Result<Vec<DataObject>, Self::Error>;

    /// Every record matching the query, paging through the whole result
    async fn find_all(&self, query: &Query) -> std::result::Result<Vec<DataObject>, Self::Error>;

    async fn first(&self, query: &Query) -> std::result::Result<Option<DataObject>, Self::Error>;

    async fn count(&self, query: &Query) -> std::result::Result<u64, Self::Error>;

    /// Distinct values of `key` among matching records
    async fn distinct(
        &self,
        query: &Query,
        key: &str,
    ) -> std::result::Result<Vec<JsonValue>, Self::Error>;

    /// Run an aggregation pipeline over the class
    async fn aggregate(
        &self,
        query: &Query,
        pipeline: &JsonValue,
    ) -> std::result::Result<Vec<JsonValue>, Self::Error>;

    /// Create or update a record, returning the stored version
    async fn save(&self, object: DataObject) -> std::result::Result<DataObject, Self::Error>;

    async fn save_all(
        &self,
        objects: Vec<DataObject>,
    ) -> std::result::Result<Vec<DataObject>, Self::Error>;

    /// Delete a record, returning it as it was
    async fn destroy(&self, object: DataObject) -> std::result::Result<DataObject, Self::Error>;

    async fn destroy_all(
        &self,
        objects: Vec<DataObject>,
    ) -> std::result::Result<Vec<DataObject>, Self::Error>;
}

/// Read results that can live in the cache
trait Cacheable: Sized {
    /// `None` when this particular value must not be cached
    fn to_cached(&self) -> Option<CachedResult>;

    fn from_cached(result: CachedResult) -> Option<Self>;
}

impl Cacheable for Option<DataObject> {
    fn to_cached(&self) -> Option<CachedResult> {
        self.as_ref().map(|object| CachedResult::Object(object.clone()))
    }

    fn from_cached(result: CachedResult) -> Option<Self> {
        result.into_object().map(Some)
    }
}

impl Cacheable for Vec<DataObject> {
    fn to_cached(&self) -> Option<CachedResult> {
        Some(CachedResult::Objects(self.clone()))
    }

    fn from_cached(result: CachedResult) -> Option<Self> {
        result.into_objects()
    }
}

impl Cacheable for u64 {
    fn to_cached(&self) -> Option<CachedResult> {
        Some(CachedResult::Scalar(JsonValue::from(*self)))
    }

    fn from_cached(result: CachedResult) -> Option<Self> {
        result.into_scalar()?.as_u64()
    }
}

impl Cacheable for Vec<JsonValue> {
    fn to_cached(&self) -> Option<CachedResult> {
        Some(CachedResult::Scalar(JsonValue::Array(self.clone())))
    }

    fn from_cached(result: CachedResult) -> Option<Self> {
        match result.into_scalar()? {
            JsonValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

/// Object store with read-through caching and write-triggered invalidation
pub struct CachedStore<S> {
    inner: S,
    cache: QueryCache,
}

impl<S: ObjectStore> CachedStore<S> {
    pub fn new(inner: S, cache: QueryCache) -> Self {
        Self { inner, cache }
    }

    /// The undecorated store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub async fn get(
        &self,
        class_name: &str,
        object_id: &str,
    ) -> std::result::Result<Option<DataObject>, S::Error> {
        let query = Query::new(class_name);
        let key = derive_query_key(&query, QueryOp::Get, &[object_id]);
        let namespace = self.cache.config().invalidation_policy.class_namespace(class_name);
        self.read_through(
            QueryOp::Get,
            class_name,
            namespace,
            key,
            || self.inner.get(class_name, object_id),
        )
        .await
    }

    pub async fn find(&self, query: &Query) -> std::result::Result<Vec<DataObject>, S::Error> {
        self.read_query(QueryOp::Find, query, NO_ARGS, || self.inner.find(query))
            .await
    }

    pub async fn find_all(&self, query: &Query) -> std::result::Result<Vec<DataObject>, S::Error> {
        self.read_query(QueryOp::FindAll, query, NO_ARGS, || self.inner.find_all(query))
            .await
    }

    pub async fn first(&self, query: &Query) -> std::result::Result<Option<DataObject>, S::Error> {
        self.read_query(QueryOp::First, query, NO_ARGS, || self.inner.first(query))
            .await
    }

    pub async fn count(&self, query: &Query) -> std::result::Result<u64, S::Error> {
        self.read_query(QueryOp::Count, query, NO_ARGS, || self.inner.count(query))
            .await
    }

    pub async fn distinct(
        &self,
        query: &Query,
        key: &str,
    ) -> std::result::Result<Vec<JsonValue>, S::Error> {
        self.read_query(QueryOp::Distinct, query, &[key], || {
            self.inner.distinct(query, key)
        })
        .await
    }

    pub async fn aggregate(
        &self,
        query: &Query,
        pipeline: &JsonValue,
    ) -> std::result::Result<Vec<JsonValue>, S::Error> {
        self.read_query(QueryOp::Aggregate, query, &[pipeline], || {
            self.inner.aggregate(query, pipeline)
        })
        .await
    }

    /// Visit matching records in batches of `batch_size`
    pub async fn each_batch<F>(
        &self,
        query: &Query,
        batch_size: usize,
        mut visit: F,
    ) -> std::result::Result<(), S::Error>
    where
        F: FnMut(&[DataObject]) + Send,
    {
        let objects: Vec<DataObject> = self
            .read_query(QueryOp::EachBatch, query, &[batch_size], || {
                self.inner.find_all(query)
            })
            .await?;

        for batch in objects.chunks(batch_size.max(1)) {
            visit(batch);
        }
        Ok(())
    }

    /// Visit every matching record
    pub async fn each<F>(&self, query: &Query, mut visit: F) -> std::result::Result<(), S::Error>
    where
        F: FnMut(&DataObject) + Send,
    {
        let objects: Vec<DataObject> = self
            .read_query(QueryOp::Each, query, NO_ARGS, || self.inner.find_all(query))
            .await?;

        objects.iter().for_each(&mut visit);
        Ok(())
    }

    /// Transform every matching record
    pub async fn map<T, F>(
        &self,
        query: &Query,
        transform: F,
    ) -> std::result::Result<Vec<T>, S::Error>
    where
        F: FnMut(&DataObject) -> T + Send,
    {
        let objects: Vec<DataObject> = self
            .read_query(QueryOp::Map, query, NO_ARGS, || self.inner.find_all(query))
            .await?;

        Ok(objects.iter().map(transform).collect())
    }

    /// Matching records for which `predicate` holds
    pub async fn filter<F>(
        &self,
        query: &Query,
        mut predicate: F,
    ) -> std::result::Result<Vec<DataObject>, S::Error>
    where
        F: FnMut(&DataObject) -> bool + Send,
    {
        let objects: Vec<DataObject> = self
            .read_query(QueryOp::Filter, query, NO_ARGS, || self.inner.find_all(query))
            .await?;

        Ok(objects.into_iter().filter(|object| predicate(object)).collect())
    }

    /// Fold every matching record into an accumulator
    pub async fn reduce<A, F>(
        &self,
        query: &Query,
        init: A,
        fold: F,
    ) -> std::result::Result<A, S::Error>
    where
        A: Send,
        F: FnMut(A, &DataObject) -> A + Send,
    {
        let objects: Vec<DataObject> = self
            .read_query(QueryOp::Reduce, query, NO_ARGS, || self.inner.find_all(query))
            .await?;

        Ok(objects.iter().fold(init, fold))
    }

    pub async fn save(&self, object: DataObject) -> std::result::Result<DataObject, S::Error> {
        let saved = self.inner.save(object).await?;
        self.after_write(InvalidationReason::Save, std::slice::from_ref(&saved))
            .await;
        Ok(saved)
    }

    pub async fn save_all(
        &self,
        objects: Vec<DataObject>,
    ) -> std::result::Result<Vec<DataObject>, S::Error> {
        let saved = self.inner.save_all(objects).await?;
        self.after_write(InvalidationReason::SaveAll, &saved).await;
        Ok(saved)
    }

    pub async fn destroy(&self, object: DataObject) -> std::result::Result<DataObject, S::Error> {
        let destroyed = self.inner.destroy(object).await?;
        self.after_write(InvalidationReason::Destroy, std::slice::from_ref(&destroyed))
            .await;
        Ok(destroyed)
    }

    pub async fn destroy_all(
        &self,
        objects: Vec<DataObject>,
    ) -> std::result::Result<Vec<DataObject>, S::Error> {
        let destroyed = self.inner.destroy_all(objects).await?;
        self.after_write(InvalidationReason::DestroyAll, &destroyed)
            .await;
        Ok(destroyed)
    }

    async fn after_write(&self, reason: InvalidationReason, written: &[DataObject]) {
        let config = self.cache.config();
        if !config.invalidate_on_write {
            return;
        }

        let namespaces = config.invalidation_policy.namespaces_for_all(written);
        debug!(
            "{} of {} records touches namespaces {:?}",
            reason,
            written.len(),
            namespaces
        );
        self.cache.invalidator().submit(reason, namespaces).await;
    }

    async fn read_query<T, A, F, Fut>(
        &self,
        op: QueryOp,
        query: &Query,
        extra_args: &A,
        load: F,
    ) -> std::result::Result<T, S::Error>
    where
        T: Cacheable,
        A: serde::Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, S::Error>>,
    {
        let key = derive_query_key(query, op, extra_args);
        let namespace = self.cache.config().invalidation_policy.read_namespace(query);
        self.read_through(op, &query.class_name, namespace, key, load)
            .await
    }

    /// Answer from the cache, or load from the store and populate
    async fn read_through<T, F, Fut>(
        &self,
        op: QueryOp,
        class_name: &str,
        namespace: Option<Namespace>,
        key: Result<CacheKey>,
        load: F,
    ) -> std::result::Result<T, S::Error>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, S::Error>>,
    {
        let stats = self.cache.recorder();

        if !op.is_cacheable() {
            return load().await;
        }

        let key = match key {
            Ok(key) => key,
            Err(e) => {
                debug!("Bypassing cache for {} on {}: {}", op, class_name, e);
                stats.bypass();
                return load().await;
            }
        };

        // No write would ever clear an entry indexed nowhere
        let Some(namespace) = namespace else {
            debug!("Bypassing cache for unscoped {} on {}", op, class_name);
            stats.bypass();
            return load().await;
        };

        if let Some(value) = self.lookup::<T>(op, class_name, &key).await {
            stats.hit();
            return Ok(value);
        }
        stats.miss();

        let value = load().await?;

        if let Some(result) = value.to_cached() {
            self.populate(&namespace, &key, &result).await;
        }
        Ok(value)
    }

    async fn lookup<T: Cacheable>(
        &self,
        op: QueryOp,
        class_name: &str,
        key: &CacheKey,
    ) -> Option<T> {
        let stats = self.cache.recorder();

        let bytes = match self.cache.bounded("cache get", self.cache.store().get(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Cache miss: {} {} ({})", op, class_name, key);
                return None;
            }
            Err(e) => {
                warn!("Cache read failed for {}, falling back to store: {}", key, e);
                stats.backend_error();
                return None;
            }
        };

        match entry::decode(&bytes, Some(class_name)) {
            Ok(result) => {
                let shape = result.shape();
                match T::from_cached(result) {
                    Some(value) => {
                        debug!("Cache hit: {} {} ({})", op, class_name, key);
                        Some(value)
                    }
                    None => {
                        warn!("Cached {} entry {} has unexpected shape {}", op, key, shape);
                        stats.corrupt();
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Discarding corrupt cache entry {}: {}", key, e);
                stats.corrupt();
                None
            }
        }
    }

    async fn populate(&self, namespace: &Namespace, key: &CacheKey, result: &CachedResult) {
        let stats = self.cache.recorder();

        let bytes = match entry::encode(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not encode result for {}: {}", key, e);
                stats.bypass();
                return;
            }
        };

        let ttl = self.cache.config().ttl_with_jitter();
        let stored = self
            .cache
            .bounded(
                "cache set",
                self.cache.store().set(namespace, key, &bytes, ttl),
            )
            .await;

        match stored {
            Ok(()) => stats.set(),
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                stats.backend_error();
            }
        }
    }
}

impl<S> std::fmt::Debug for CachedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedStore")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
