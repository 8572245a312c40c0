//! Write-triggered cache invalidation
//!
//! A successful write maps the affected records to namespaces through the
//! configured [`InvalidationPolicy`] and hands them to the [`Invalidator`],
//! which clears them either on a background worker or inline. Failures are
//! retried, then logged, counted and published as [`InvalidationEvent`]s.
//! They never reach the writer and never undo the write.

use crate::cache::store::CacheStore;
use crate::cache::types::{Namespace, StatsRecorder};
use crate::error::{CacheError, Result};
use crate::model::{reference_id, DataObject, Query};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Capacity of the invalidation event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How writes map to namespaces
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Writes never purge anything; entries live until their TTL
    Disabled,

    /// A write purges every cached read of the record's class
    #[default]
    ClassWide,

    /// A write purges the reads scoped to each related record it references
    Scoped {
        /// Relation fields whose referenced id scopes the namespace
        relation_fields: Vec<String>,

        /// Also purge the class namespace, where unscoped reads are indexed
        #[serde(default = "default_true")]
        include_class_wide: bool,
    },
}

fn default_true() -> bool {
    true
}

impl InvalidationPolicy {
    /// Scoped policy over the given relation fields, class namespace included
    pub fn scoped<I, S>(relation_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InvalidationPolicy::Scoped {
            relation_fields: relation_fields.into_iter().map(Into::into).collect(),
            include_class_wide: true,
        }
    }

    /// Namespaces to purge after `object` was written
    pub fn namespaces_for(&self, object: &DataObject) -> Vec<Namespace> {
        match self {
            InvalidationPolicy::Disabled => Vec::new(),
            InvalidationPolicy::ClassWide => vec![Namespace::class(&object.class_name)],
            InvalidationPolicy::Scoped {
                relation_fields,
                include_class_wide,
            } => {
                let mut namespaces = Vec::new();

                for field in relation_fields {
                    match object.get(field) {
                        None | Some(serde_json::Value::Null) => {}
                        Some(value) => match reference_id(value) {
                            Some(id) => {
                                namespaces.push(Namespace::scoped(&object.class_name, id))
                            }
                            None => warn!(
                                "Relation field {}.{} has no usable id, skipping scoped invalidation",
                                object.class_name, field
                            ),
                        },
                    }
                }

                if *include_class_wide {
                    namespaces.push(Namespace::class(&object.class_name));
                }
                namespaces
            }
        }
    }

    /// Union of the namespaces of every written record, de-duplicated
    pub fn namespaces_for_all(&self, objects: &[DataObject]) -> Vec<Namespace> {
        objects
            .iter()
            .flat_map(|object| self.namespaces_for(object))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Namespace unscoped reads of `class_name` are indexed under
    ///
    /// `None` when no write would ever clear it: a scoped policy without
    /// `include_class_wide` only purges scoped namespaces, so such reads must
    /// not be cached at all.
    pub fn class_namespace(&self, class_name: &str) -> Option<Namespace> {
        match self {
            InvalidationPolicy::Scoped {
                include_class_wide: false,
                ..
            } => None,
            _ => Some(Namespace::class(class_name)),
        }
    }

    /// Namespace a read of `query` is indexed under
    ///
    /// Under the scoped policy, a `where` clause that pins a relation field to
    /// a single record selects that record's namespace. Everything else falls
    /// back to [`class_namespace`](Self::class_namespace).
    pub fn read_namespace(&self, query: &Query) -> Option<Namespace> {
        if let InvalidationPolicy::Scoped {
            relation_fields, ..
        } = self
        {
            let scope = relation_fields
                .iter()
                .find_map(|field| query.where_clause.get(field).and_then(reference_id));
            if let Some(id) = scope {
                return Some(Namespace::scoped(&query.class_name, id));
            }
        }
        self.class_namespace(&query.class_name)
    }
}

/// Whether writes wait for their invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMode {
    /// Queue the clear on a worker task; the write returns immediately
    #[default]
    Background,

    /// Clear before the write call returns
    Inline,
}

/// What triggered an invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    Save,
    SaveAll,
    Destroy,
    DestroyAll,
    Manual,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Save => write!(f, "save"),
            InvalidationReason::SaveAll => write!(f, "save all"),
            InvalidationReason::Destroy => write!(f, "destroy"),
            InvalidationReason::DestroyAll => write!(f, "destroy all"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
        }
    }
}

/// Outcome of clearing one namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub id: Uuid,

    pub reason: InvalidationReason,

    /// When the clear finished
    pub timestamp: DateTime<Utc>,

    pub namespace: Namespace,

    /// Entry keys removed
    pub keys_removed: usize,

    /// Attempts made, including the first
    pub attempts: u32,

    /// Last error when every attempt failed
    pub error: Option<String>,
}

impl InvalidationEvent {
    fn new(reason: InvalidationReason, namespace: Namespace, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason,
            timestamp: Utc::now(),
            namespace,
            keys_removed: 0,
            attempts,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

enum Job {
    Clear {
        reason: InvalidationReason,
        namespaces: Vec<Namespace>,
    },
    Flush(oneshot::Sender<()>),
}

/// Clears namespaces with retries and reports the outcome
pub struct Invalidator {
    inner: Arc<InvalidatorInner>,
    mode: InvalidationMode,
    jobs: Option<mpsc::UnboundedSender<Job>>,
}

struct InvalidatorInner {
    store: CacheStore,
    stats: Arc<StatsRecorder>,
    retries: u32,
    retry_delay: Duration,
    /// Bound on a single clear attempt
    attempt_timeout: Duration,
    events: broadcast::Sender<InvalidationEvent>,
}

impl Invalidator {
    /// Create the invalidator, spawning its worker in background mode
    ///
    /// Must be called from within a tokio runtime when `mode` is
    /// [`InvalidationMode::Background`]. The worker stops once the
    /// invalidator is dropped and its queue is drained. Each clear attempt
    /// is abandoned after `attempt_timeout` and counts as a failed attempt.
    pub(crate) fn spawn(
        store: CacheStore,
        stats: Arc<StatsRecorder>,
        mode: InvalidationMode,
        retries: u32,
        retry_delay: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(InvalidatorInner {
            store,
            stats,
            retries,
            retry_delay,
            attempt_timeout,
            events,
        });

        let jobs = match mode {
            InvalidationMode::Inline => None,
            InvalidationMode::Background => {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                let worker = Arc::clone(&inner);
                tokio::spawn(async move {
                    debug!("Invalidation worker started");
                    while let Some(job) = rx.recv().await {
                        match job {
                            Job::Clear { reason, namespaces } => {
                                worker.clear_all(reason, &namespaces).await;
                            }
                            Job::Flush(done) => {
                                let _ = done.send(());
                            }
                        }
                    }
                    debug!("Invalidation worker stopped");
                });
                Some(tx)
            }
        };

        Self { inner, mode, jobs }
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    /// Receive an event for every namespace clear from now on
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.inner.events.subscribe()
    }

    /// Clear namespaces after a write
    ///
    /// Background mode only enqueues; inline mode returns once every
    /// namespace was handled. Failures are reported through events and stats.
    pub async fn submit(&self, reason: InvalidationReason, namespaces: Vec<Namespace>) {
        if namespaces.is_empty() {
            return;
        }

        let Some(jobs) = &self.jobs else {
            self.inner.clear_all(reason, &namespaces).await;
            return;
        };

        if let Err(mpsc::error::SendError(job)) = jobs.send(Job::Clear { reason, namespaces }) {
            warn!("Invalidation worker is gone, clearing inline");
            if let Job::Clear { reason, namespaces } = job {
                self.inner.clear_all(reason, &namespaces).await;
            }
        }
    }

    /// Clear one namespace now, returning the number of entries removed
    pub async fn clear_namespace(
        &self,
        reason: InvalidationReason,
        namespace: &Namespace,
    ) -> Result<usize> {
        self.inner.clear_with_retry(reason, namespace).await
    }

    /// Wait until every invalidation queued so far has been processed
    pub async fn flush(&self) {
        if let Some(jobs) = &self.jobs {
            let (tx, rx) = oneshot::channel();
            if jobs.send(Job::Flush(tx)).is_ok() {
                let _ = rx.await;
            }
        }
    }
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invalidator")
            .field("mode", &self.mode)
            .field("retries", &self.inner.retries)
            .field("attempt_timeout", &self.inner.attempt_timeout)
            .finish()
    }
}

impl InvalidatorInner {
    async fn clear_all(&self, reason: InvalidationReason, namespaces: &[Namespace]) {
        for namespace in namespaces {
            // Already logged, counted and published
            let _ = self.clear_with_retry(reason, namespace).await;
        }
    }

    async fn clear_with_retry(
        &self,
        reason: InvalidationReason,
        namespace: &Namespace,
    ) -> Result<usize> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = tokio::time::timeout(self.attempt_timeout, self.store.clear(namespace))
                .await
                .unwrap_or_else(|_| {
                    Err(CacheError::Timeout {
                        timeout_ms: self.attempt_timeout.as_millis() as u64,
                        context: format!("clear namespace {}", namespace),
                    })
                });

            match outcome {
                Ok(removed) => {
                    self.stats.invalidated(removed);
                    info!(
                        "Invalidated namespace {} ({}): {} entries",
                        namespace, reason, removed
                    );

                    let mut event = InvalidationEvent::new(reason, namespace.clone(), attempt);
                    event.keys_removed = removed;
                    self.publish(event);
                    return Ok(removed);
                }
                Err(e) if attempt <= self.retries => {
                    warn!(
                        "Invalidation of namespace {} failed (attempt {}/{}), retrying after {:?}: {}",
                        namespace,
                        attempt,
                        self.retries + 1,
                        self.retry_delay,
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        "Giving up on invalidation of namespace {} after {} attempts: {}",
                        namespace, attempt, e
                    );
                    self.stats.invalidation_failed();

                    let mut event = InvalidationEvent::new(reason, namespace.clone(), attempt);
                    event.error = Some(e.to_string());
                    self.publish(event);

                    return Err(CacheError::InvalidationFailure {
                        namespace: namespace.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn publish(&self, event: InvalidationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::KvBackend;
    use crate::cache::config::CacheConfig;
    use crate::cache::memory::MemoryBackend;
    use crate::cache::types::CacheKey;
    use crate::model::pointer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn order(customer: &str) -> DataObject {
        DataObject::with_id("Order", "o1")
            .field("status", "open")
            .field("Customer", pointer("Customer", customer))
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(InvalidationReason::Save.to_string(), "save");
        assert_eq!(
            InvalidationReason::Manual.to_string(),
            "manual invalidation"
        );
    }

    #[test]
    fn test_class_wide_policy() {
        let policy = InvalidationPolicy::ClassWide;
        assert_eq!(
            policy.namespaces_for(&order("c1")),
            vec![Namespace::class("Order")]
        );
        assert_eq!(
            policy.read_namespace(&Query::new("Order").equal_to("Customer", "c1")),
            Some(Namespace::class("Order"))
        );
    }

    #[test]
    fn test_disabled_policy() {
        let policy = InvalidationPolicy::Disabled;
        assert!(policy.namespaces_for(&order("c1")).is_empty());
        assert_eq!(
            policy.read_namespace(&Query::new("Order")),
            Some(Namespace::class("Order"))
        );
    }

    #[test]
    fn test_scoped_policy_namespaces() {
        let policy = InvalidationPolicy::scoped(["Customer"]);
        assert_eq!(
            policy.namespaces_for(&order("c1")),
            vec![Namespace::scoped("Order", "c1"), Namespace::class("Order")]
        );

        let narrow = InvalidationPolicy::Scoped {
            relation_fields: vec!["Customer".to_string()],
            include_class_wide: false,
        };
        assert_eq!(
            narrow.namespaces_for(&order("c1")),
            vec![Namespace::scoped("Order", "c1")]
        );
    }

    #[test]
    fn test_scoped_policy_skips_missing_relations() {
        let policy = InvalidationPolicy::Scoped {
            relation_fields: vec!["Customer".to_string(), "Provider".to_string()],
            include_class_wide: false,
        };

        let unrelated = DataObject::with_id("Order", "o2").field("Provider", json!(null));
        assert!(policy.namespaces_for(&unrelated).is_empty());

        let malformed = DataObject::with_id("Order", "o3").field("Customer", json!(42));
        assert!(policy.namespaces_for(&malformed).is_empty());
    }

    #[test]
    fn test_batch_namespaces_are_unioned() {
        let policy = InvalidationPolicy::scoped(["Customer"]);
        let namespaces = policy.namespaces_for_all(&[order("c1"), order("c2"), order("c1")]);

        assert_eq!(
            namespaces,
            vec![
                Namespace::class("Order"),
                Namespace::scoped("Order", "c1"),
                Namespace::scoped("Order", "c2"),
            ]
        );
    }

    #[test]
    fn test_scoped_read_namespace() {
        let policy = InvalidationPolicy::scoped(["Customer"]);

        let by_id = Query::new("Order").equal_to("Customer", "c1");
        let by_pointer = Query::new("Order").equal_to("Customer", pointer("Customer", "c2"));
        let by_range = Query::new("Order").constraint("Customer", "$in", json!(["c1", "c2"]));

        assert_eq!(
            policy.read_namespace(&by_id),
            Some(Namespace::scoped("Order", "c1"))
        );
        assert_eq!(
            policy.read_namespace(&by_pointer),
            Some(Namespace::scoped("Order", "c2"))
        );
        assert_eq!(
            policy.read_namespace(&by_range),
            Some(Namespace::class("Order"))
        );
    }

    #[test]
    fn test_narrow_scoped_policy_has_no_class_namespace() {
        let narrow = InvalidationPolicy::Scoped {
            relation_fields: vec!["Customer".to_string()],
            include_class_wide: false,
        };

        assert_eq!(narrow.class_namespace("Order"), None);
        assert_eq!(narrow.read_namespace(&Query::new("Order")), None);
        assert_eq!(
            narrow.read_namespace(&Query::new("Order").equal_to("Customer", "c1")),
            Some(Namespace::scoped("Order", "c1"))
        );
        assert_eq!(
            InvalidationPolicy::Disabled.class_namespace("Order"),
            Some(Namespace::class("Order"))
        );
    }

    #[test]
    fn test_policy_serde() {
        let policy: InvalidationPolicy =
            serde_json::from_value(json!({"kind": "scoped", "relation_fields": ["Customer"]}))
                .unwrap();
        assert_eq!(policy, InvalidationPolicy::scoped(["Customer"]));
    }

    fn memory_store() -> CacheStore {
        let config = CacheConfig::builder().enable_auto_cleanup(false).build();
        CacheStore::new(Arc::new(MemoryBackend::new(config)), "qc:")
    }

    async fn seed(store: &CacheStore, namespace: &Namespace, n: u8) {
        store
            .set(
                namespace,
                &CacheKey::from_digest(&[n; 32]),
                b"v",
                Duration::from_secs(60),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_background_clear_after_flush() {
        let store = memory_store();
        let stats = Arc::new(StatsRecorder::default());
        let orders = Namespace::class("Order");
        seed(&store, &orders, 1).await;
        seed(&store, &orders, 2).await;

        let invalidator = Invalidator::spawn(
            store.clone(),
            stats.clone(),
            InvalidationMode::Background,
            0,
            Duration::ZERO,
            Duration::from_secs(1),
        );
        let mut events = invalidator.subscribe();

        invalidator
            .submit(InvalidationReason::Save, vec![orders.clone()])
            .await;
        invalidator.flush().await;

        assert!(store.indexed_keys(&orders).await.unwrap().is_empty());
        let event = events.recv().await.unwrap();
        assert!(event.succeeded());
        assert_eq!(event.keys_removed, 2);
        assert_eq!(event.namespace, orders);
        assert_eq!(stats.snapshot().keys_purged, 2);
    }

    #[tokio::test]
    async fn test_inline_clear() {
        let store = memory_store();
        let orders = Namespace::class("Order");
        seed(&store, &orders, 1).await;

        let invalidator = Invalidator::spawn(
            store.clone(),
            Arc::new(StatsRecorder::default()),
            InvalidationMode::Inline,
            0,
            Duration::ZERO,
            Duration::from_secs(1),
        );
        invalidator
            .submit(InvalidationReason::Destroy, vec![orders.clone()])
            .await;

        assert!(store.get(&CacheKey::from_digest(&[1; 32])).await.unwrap().is_none());
    }

    /// Backend whose list reads fail a fixed number of times
    struct FlakyBackend {
        inner: MemoryBackend,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
        async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
            self.inner.set_with_expiry(key, value, ttl).await
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }
        async fn list_push(&self, list: &str, member: &str) -> Result<()> {
            self.inner.list_push(list, member).await
        }
        async fn list_members(&self, list: &str) -> Result<Vec<String>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(CacheError::Backend("connection reset".to_string()));
            }
            self.inner.list_members(list).await
        }
        async fn delete(&self, keys: &[String]) -> Result<u64> {
            self.inner.delete(keys).await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn flaky_store(failures: u32) -> CacheStore {
        let config = CacheConfig::builder().enable_auto_cleanup(false).build();
        let backend = FlakyBackend {
            inner: MemoryBackend::new(config),
            failures_left: AtomicU32::new(failures),
        };
        CacheStore::new(Arc::new(backend), "qc:")
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let store = flaky_store(2);
        let orders = Namespace::class("Order");
        seed(&store, &orders, 1).await;

        let invalidator = Invalidator::spawn(
            store,
            Arc::new(StatsRecorder::default()),
            InvalidationMode::Inline,
            2,
            Duration::from_millis(1),
            Duration::from_secs(1),
        );
        let mut events = invalidator.subscribe();

        let removed = invalidator
            .clear_namespace(InvalidationReason::Manual, &orders)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(events.recv().await.unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported() {
        let stats = Arc::new(StatsRecorder::default());
        let invalidator = Invalidator::spawn(
            flaky_store(10),
            stats.clone(),
            InvalidationMode::Background,
            1,
            Duration::from_millis(1),
            Duration::from_secs(1),
        );
        let mut events = invalidator.subscribe();

        invalidator
            .submit(InvalidationReason::Save, vec![Namespace::class("Order")])
            .await;
        invalidator.flush().await;

        let event = events.recv().await.unwrap();
        assert!(!event.succeeded());
        assert_eq!(event.attempts, 2);
        assert_eq!(stats.snapshot().invalidation_failures, 1);

        let manual = invalidator
            .clear_namespace(InvalidationReason::Manual, &Namespace::class("Order"))
            .await;
        assert!(matches!(
            manual,
            Err(CacheError::InvalidationFailure { .. })
        ));
    }

    /// Backend whose list reads never complete
    struct StuckBackend {
        inner: MemoryBackend,
    }

    #[async_trait]
    impl KvBackend for StuckBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }
        async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
            self.inner.set_with_expiry(key, value, ttl).await
        }
        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }
        async fn list_push(&self, list: &str, member: &str) -> Result<()> {
            self.inner.list_push(list, member).await
        }
        async fn list_members(&self, _list: &str) -> Result<Vec<String>> {
            std::future::pending::<Result<Vec<String>>>().await
        }
        async fn delete(&self, keys: &[String]) -> Result<u64> {
            self.inner.delete(keys).await
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "stuck"
        }
    }

    fn stuck_store() -> CacheStore {
        let config = CacheConfig::builder().enable_auto_cleanup(false).build();
        let backend = StuckBackend {
            inner: MemoryBackend::new(config),
        };
        CacheStore::new(Arc::new(backend), "qc:")
    }

    #[tokio::test]
    async fn test_stuck_clear_times_out() {
        let stats = Arc::new(StatsRecorder::default());
        let invalidator = Invalidator::spawn(
            stuck_store(),
            stats.clone(),
            InvalidationMode::Inline,
            1,
            Duration::from_millis(1),
            Duration::from_millis(20),
        );
        let mut events = invalidator.subscribe();

        let submitted = tokio::time::timeout(
            Duration::from_secs(2),
            invalidator.submit(InvalidationReason::Save, vec![Namespace::class("Order")]),
        )
        .await;
        assert!(submitted.is_ok(), "inline invalidation must not hang");

        let event = events.recv().await.unwrap();
        assert!(!event.succeeded());
        assert_eq!(event.attempts, 2);
        assert!(event.error.unwrap().contains("timed out"));
        assert_eq!(stats.snapshot().invalidation_failures, 1);

        let manual = tokio::time::timeout(
            Duration::from_secs(2),
            invalidator.clear_namespace(InvalidationReason::Manual, &Namespace::class("Order")),
        )
        .await
        .expect("manual invalidation must not hang");
        assert!(matches!(
            manual,
            Err(CacheError::InvalidationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_stuck_clear_does_not_stall_worker() {
        let invalidator = Invalidator::spawn(
            stuck_store(),
            Arc::new(StatsRecorder::default()),
            InvalidationMode::Background,
            0,
            Duration::ZERO,
            Duration::from_millis(20),
        );

        for _ in 0..3 {
            invalidator
                .submit(InvalidationReason::Save, vec![Namespace::class("Order")])
                .await;
        }

        let flushed = tokio::time::timeout(Duration::from_secs(2), invalidator.flush()).await;
        assert!(flushed.is_ok(), "worker must drain its queue");
    }
}
