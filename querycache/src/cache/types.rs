//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fingerprint of a read request: lowercase hex SHA-256
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of a key in characters
    pub const LEN: usize = 64;

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// Parse a key previously rendered with `as_str`
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == Self::LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invalidation scope grouping cache keys that are purged together
///
/// Scoped namespaces are `{class}:{id}`, so a class name must not contain
/// `:`. Reads of such classes are never cached (see
/// [`derive_key`](crate::cache::key::derive_key)); a write to one can only
/// purge more than needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Separator between the class name and the scoping identifier
    pub const SCOPE_SEPARATOR: char = ':';

    /// Class-wide namespace
    pub fn class(class_name: &str) -> Self {
        Self(class_name.to_string())
    }

    /// Namespace narrowed to records related to `scope_id`
    pub fn scoped(class_name: &str, scope_id: &str) -> Self {
        Self(format!("{}{}{}", class_name, Self::SCOPE_SEPARATOR, scope_id))
    }

    /// Class-wide or scoped, depending on whether a scope is given
    pub fn for_class(class_name: &str, scope_id: Option<&str>) -> Self {
        match scope_id {
            Some(scope) => Self::scoped(class_name, scope),
            None => Self::class(class_name),
        }
    }

    /// Wrap a namespace string computed elsewhere
    pub fn raw(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from the cache
    pub hits: u64,

    /// Reads that went to the underlying store
    pub misses: u64,

    /// Entries written after a miss
    pub sets: u64,

    /// Reads that skipped the cache because the key could not be derived
    pub bypassed: u64,

    /// Stored entries that failed to decode
    pub corrupt_entries: u64,

    /// Cache backend calls that failed or timed out during reads
    pub backend_errors: u64,

    /// Namespaces cleared
    pub invalidations: u64,

    /// Entry keys removed by clears
    pub keys_purged: u64,

    /// Namespace clears abandoned after retries
    pub invalidation_failures: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Total soft failures observed by the caching layer
    pub fn total_faults(&self) -> u64 {
        self.bypassed + self.corrupt_entries + self.backend_errors + self.invalidation_failures
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, sets: {}, invalidations: {}, faults: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.sets,
            self.invalidations,
            self.total_faults()
        )
    }
}

/// Lock-free counters shared by the decorator and the invalidator
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    bypassed: AtomicU64,
    corrupt_entries: AtomicU64,
    backend_errors: AtomicU64,
    invalidations: AtomicU64,
    keys_purged: AtomicU64,
    invalidation_failures: AtomicU64,
}

impl StatsRecorder {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn corrupt(&self) {
        self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidated(&self, keys: usize) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.keys_purged.fetch_add(keys as u64, Ordering::Relaxed);
    }

    pub fn invalidation_failed(&self) {
        self.invalidation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            keys_purged: self.keys_purged.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            corrupt_entries: 2,
            bypassed: 1,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
        assert!(display.contains("faults: 3"));
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.hit();
        recorder.miss();
        recorder.miss();
        recorder.invalidated(3);

        let stats = recorder.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.keys_purged, 3);
    }

    #[test]
    fn test_namespace_forms() {
        assert_eq!(Namespace::class("Order").as_str(), "Order");
        assert_eq!(Namespace::scoped("Order", "c1").as_str(), "Order:c1");
        assert_eq!(Namespace::for_class("Order", None), Namespace::class("Order"));
        assert_ne!(
            Namespace::scoped("Order", "c1"),
            Namespace::scoped("Orderc", "1")
        );
    }

    #[test]
    fn test_cache_key_parse() {
        let key = CacheKey::from_digest(&[0xab; 32]);
        assert_eq!(key.as_str().len(), CacheKey::LEN);
        assert_eq!(CacheKey::parse(key.as_str()), Some(key));
        assert_eq!(CacheKey::parse("not-a-key"), None);
        assert_eq!(CacheKey::parse(&"A".repeat(64)), None);
    }
}
