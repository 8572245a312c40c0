//! In-process backend with TTL support and LRU eviction
//!
//! Useful for single-process deployments and for tests. It honours the
//! cache-size options of [`CacheConfig`]:
//! - `max_entries` / `max_size_bytes`: least recently used values are evicted
//!   first; namespace lists are not counted and never evicted
//! - `allow_stale`: an expired value is returned once more, then dropped
//! - `update_age_on_get` / `update_age_on_has`: a read restarts the entry TTL

use crate::cache::{backend::KvBackend, config::CacheConfig};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Eviction counters for the in-memory backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Live values
    pub entries: usize,

    /// Bytes held by live values (key + value)
    pub size_bytes: usize,

    /// Values evicted to satisfy the entry or size limit
    pub evictions_size: u64,

    /// Values dropped after their TTL
    pub evictions_ttl: u64,
}

struct MemoryEntry {
    value: Vec<u8>,
    ttl: Duration,
    expires_at: Instant,
    size_bytes: usize,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn refresh(&mut self, now: Instant) {
        self.expires_at = now + self.ttl;
    }
}

/// Internal storage
#[derive(Default)]
struct MemoryStore {
    entries: HashMap<String, MemoryEntry>,
    lists: HashMap<String, Vec<String>>,
    /// Access order, least recent first
    lru_queue: VecDeque<String>,
    current_size_bytes: usize,
    stats: MemoryStats,
}

impl MemoryStore {
    fn remove_entry(&mut self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn refresh_stats(&mut self) {
        self.stats.entries = self.entries.len();
        self.stats.size_bytes = self.current_size_bytes;
    }
}

/// Key-value backend kept in process memory
pub struct MemoryBackend {
    config: CacheConfig,
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryBackend {
    /// Create a backend bounded by the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Initializing in-memory cache backend (max_entries: {}, max_size_bytes: {})",
            config.max_entries, config.max_size_bytes
        );

        Self {
            config,
            store: Arc::new(RwLock::new(MemoryStore::default())),
        }
    }

    /// Number of live values (lists excluded)
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Bytes held by live values
    pub async fn size_bytes(&self) -> usize {
        self.store.read().await.current_size_bytes
    }

    pub async fn stats(&self) -> MemoryStats {
        self.store.read().await.stats.clone()
    }

    /// Drop every expired value; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut store = self.store.write().await;
        let now = Instant::now();

        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.remove_entry(key);
        }
        store.stats.evictions_ttl += expired.len() as u64;
        store.refresh_stats();

        if !expired.is_empty() {
            debug!("Purged {} expired entries", expired.len());
        }
        expired.len()
    }

    /// Start the periodic expiry sweep if enabled in the configuration
    pub fn spawn_cleanup(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enable_auto_cleanup {
            return None;
        }

        let backend = Arc::clone(self);
        let interval = self.config.cleanup_interval;
        info!("Starting in-memory cache cleanup task (interval: {:?})", interval);

        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                backend.purge_expired().await;
            }
        }))
    }

    fn evict_if_needed(
        &self,
        store: &mut MemoryStore,
        key: &str,
        needed_size: usize,
    ) -> Result<()> {
        if needed_size > self.config.max_size_bytes {
            warn!(
                "Entry of {} bytes exceeds max_size_bytes ({})",
                needed_size, self.config.max_size_bytes
            );
            return Err(CacheError::Backend(format!(
                "entry of {} bytes exceeds cache size limit of {} bytes",
                needed_size, self.config.max_size_bytes
            )));
        }

        // The value being replaced does not count against the limits
        store.remove_entry(key);

        while store.entries.len() >= self.config.max_entries {
            match store.lru_queue.pop_front() {
                Some(victim) => {
                    debug!("Evicting entry due to max_entries limit: {}", victim);
                    store.remove_entry(&victim);
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }

        while store.current_size_bytes + needed_size > self.config.max_size_bytes {
            match store.lru_queue.pop_front() {
                Some(victim) => {
                    debug!("Evicting entry due to size limit: {}", victim);
                    store.remove_entry(&victim);
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.write().await;
        let now = Instant::now();

        let expired = match store.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(None),
        };

        if expired {
            store.stats.evictions_ttl += 1;
            let entry = store.remove_entry(key);
            store.refresh_stats();
            if self.config.allow_stale {
                debug!("Serving stale entry before removal: {}", key);
                return Ok(entry.map(|e| e.value));
            }
            return Ok(None);
        }

        let value = match store.entries.get_mut(key) {
            Some(entry) => {
                if self.config.update_age_on_get {
                    entry.refresh(now);
                }
                entry.value.clone()
            }
            None => return Ok(None),
        };
        store.touch(key);

        Ok(Some(value))
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let size_bytes = key.len() + value.len();
        let mut store = self.store.write().await;

        self.evict_if_needed(&mut store, key, size_bytes)?;

        store.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                ttl,
                expires_at: Instant::now() + ttl,
                size_bytes,
            },
        );
        store.lru_queue.push_back(key.to_string());
        store.current_size_bytes += size_bytes;
        store.refresh_stats();

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        let now = Instant::now();

        let expired = match store.entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                if self.config.update_age_on_has {
                    entry.refresh(now);
                }
                return Ok(true);
            }
            None => return Ok(false),
        };

        if expired {
            store.remove_entry(key);
            store.stats.evictions_ttl += 1;
            store.refresh_stats();
        }
        Ok(false)
    }

    async fn list_push(&self, list: &str, member: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store
            .lists
            .entry(list.to_string())
            .or_default()
            .push(member.to_string());
        Ok(())
    }

    async fn list_members(&self, list: &str) -> Result<Vec<String>> {
        let store = self.store.read().await;
        Ok(store.lists.get(list).cloned().unwrap_or_default())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut store = self.store.write().await;
        let now = Instant::now();
        let mut removed = 0;

        for key in keys {
            if let Some(entry) = store.remove_entry(key) {
                // An expired value is already gone as far as callers can tell
                if !entry.is_expired(now) {
                    removed += 1;
                }
            } else if store.lists.remove(key).is_some() {
                removed += 1;
            }
        }
        store.refresh_stats();

        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
