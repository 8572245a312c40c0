//! Configuration for the cache system

use crate::cache::invalidation::{InvalidationMode, InvalidationPolicy};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the query cache
///
/// Resolved once and owned by the [`QueryCache`](crate::QueryCache) handle
/// built from it; two handles never share configuration. Defaults:
/// - 500 entries, 50 MiB, 5 minute TTL without jitter
/// - stale reads and age refresh disabled
/// - write-triggered invalidation disabled until opted in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries (in-memory backend)
    pub max_entries: usize,

    /// Maximum total size of cached data in bytes (in-memory backend)
    pub max_size_bytes: usize,

    /// Time-to-live applied to every entry
    pub ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0), spreads expiry of entries written together
    pub ttl_jitter: f64,

    /// Serve an expired entry one last time before dropping it (in-memory backend)
    pub allow_stale: bool,

    /// Restart an entry's TTL when it is read (in-memory backend)
    pub update_age_on_get: bool,

    /// Restart an entry's TTL when its presence is checked (in-memory backend)
    pub update_age_on_has: bool,

    /// Purge affected namespaces after save/destroy
    pub invalidate_on_write: bool,

    /// How writes map to namespaces
    pub invalidation_policy: InvalidationPolicy,

    /// Whether writes wait for their invalidation to finish
    pub invalidation_mode: InvalidationMode,

    /// Extra attempts for a failed namespace clear
    pub invalidation_retries: u32,

    /// Delay between clear attempts
    pub invalidation_retry_delay: Duration,

    /// Upper bound for a cache lookup, a population write, or one clear attempt
    pub operation_timeout: Duration,

    /// Periodically sweep expired entries (in-memory backend)
    pub enable_auto_cleanup: bool,

    /// Interval for the expiry sweep
    pub cleanup_interval: Duration,

    /// Prefix applied to every backend key written by this cache
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            // 50 MB default
            max_size_bytes: 50 * 1024 * 1024,
            // 5 minutes
            ttl: Duration::from_millis(5 * 60 * 1000),
            ttl_jitter: 0.0,
            allow_stale: false,
            update_age_on_get: false,
            update_age_on_has: false,
            invalidate_on_write: false,
            invalidation_policy: InvalidationPolicy::ClassWide,
            invalidation_mode: InvalidationMode::Background,
            invalidation_retries: 2,
            invalidation_retry_delay: Duration::from_millis(100),
            operation_timeout: Duration::from_millis(250),
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
            key_prefix: "qc:".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::ConfigError(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        if self.max_size_bytes == 0 {
            return Err(CacheError::ConfigError(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }

        if self.ttl < Duration::from_millis(1) {
            return Err(CacheError::ConfigError(
                "ttl must be at least 1ms".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.operation_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "operation_timeout must be greater than 0".to_string(),
            ));
        }

        if let InvalidationPolicy::Scoped { relation_fields, .. } = &self.invalidation_policy {
            if relation_fields.is_empty() {
                return Err(CacheError::ConfigError(
                    "scoped invalidation needs at least one relation field".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// TTL in whole milliseconds
    pub fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.ttl;
        }

        let base_secs = self.ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }

    /// Read configuration from `QUERYCACHE_*` environment variables
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    /// `QUERYCACHE_SCOPE_FIELDS` (comma separated) selects the scoped policy.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(v) = env_parse::<usize>("QUERYCACHE_MAX_ENTRIES")? {
            builder = builder.max_entries(v);
        }
        if let Some(v) = env_parse::<usize>("QUERYCACHE_MAX_SIZE_BYTES")? {
            builder = builder.max_size_bytes(v);
        }
        if let Some(v) = env_parse::<u64>("QUERYCACHE_TTL_MS")? {
            builder = builder.ttl_ms(v);
        }
        if let Some(v) = env_flag("QUERYCACHE_ALLOW_STALE")? {
            builder = builder.allow_stale(v);
        }
        if let Some(v) = env_flag("QUERYCACHE_UPDATE_AGE_ON_GET")? {
            builder = builder.update_age_on_get(v);
        }
        if let Some(v) = env_flag("QUERYCACHE_UPDATE_AGE_ON_HAS")? {
            builder = builder.update_age_on_has(v);
        }
        if let Some(v) = env_flag("QUERYCACHE_INVALIDATE_ON_WRITE")? {
            builder = builder.invalidate_on_write(v);
        }
        if let Ok(prefix) = std::env::var("QUERYCACHE_KEY_PREFIX") {
            builder = builder.key_prefix(prefix);
        }
        if let Ok(fields) = std::env::var("QUERYCACHE_SCOPE_FIELDS") {
            let fields: Vec<String> = fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
            builder = builder.invalidation_policy(InvalidationPolicy::scoped(fields));
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| {
                CacheError::ConfigError(format!("{} has an invalid value: {}", name, raw))
            }),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(CacheError::ConfigError(format!(
                "{} must be a boolean, got: {}",
                name, raw
            ))),
        },
        Err(_) => Ok(None),
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    allow_stale: Option<bool>,
    update_age_on_get: Option<bool>,
    update_age_on_has: Option<bool>,
    invalidate_on_write: Option<bool>,
    invalidation_policy: Option<InvalidationPolicy>,
    invalidation_mode: Option<InvalidationMode>,
    invalidation_retries: Option<u32>,
    invalidation_retry_delay: Option<Duration>,
    operation_timeout: Option<Duration>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    key_prefix: Option<String>,
}

impl CacheConfigBuilder {
    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set maximum cache size in bytes
    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set entry time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set entry time-to-live in milliseconds
    pub fn ttl_ms(self, ms: u64) -> Self {
        self.ttl(Duration::from_millis(ms))
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale = Some(allow);
        self
    }

    pub fn update_age_on_get(mut self, enable: bool) -> Self {
        self.update_age_on_get = Some(enable);
        self
    }

    pub fn update_age_on_has(mut self, enable: bool) -> Self {
        self.update_age_on_has = Some(enable);
        self
    }

    /// Enable or disable invalidation after writes
    pub fn invalidate_on_write(mut self, enable: bool) -> Self {
        self.invalidate_on_write = Some(enable);
        self
    }

    pub fn invalidation_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.invalidation_policy = Some(policy);
        self
    }

    pub fn invalidation_mode(mut self, mode: InvalidationMode) -> Self {
        self.invalidation_mode = Some(mode);
        self
    }

    /// Set retry count and delay for failed namespace clears
    pub fn invalidation_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.invalidation_retries = Some(retries);
        self.invalidation_retry_delay = Some(delay);
        self
    }

    /// Set the bound for read-path backend calls
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            ttl: self.ttl.unwrap_or(defaults.ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            allow_stale: self.allow_stale.unwrap_or(defaults.allow_stale),
            update_age_on_get: self.update_age_on_get.unwrap_or(defaults.update_age_on_get),
            update_age_on_has: self.update_age_on_has.unwrap_or(defaults.update_age_on_has),
            invalidate_on_write: self
                .invalidate_on_write
                .unwrap_or(defaults.invalidate_on_write),
            invalidation_policy: self
                .invalidation_policy
                .unwrap_or(defaults.invalidation_policy),
            invalidation_mode: self.invalidation_mode.unwrap_or(defaults.invalidation_mode),
            invalidation_retries: self
                .invalidation_retries
                .unwrap_or(defaults.invalidation_retries),
            invalidation_retry_delay: self
                .invalidation_retry_delay
                .unwrap_or(defaults.invalidation_retry_delay),
            operation_timeout: self.operation_timeout.unwrap_or(defaults.operation_timeout),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            key_prefix: self.key_prefix.unwrap_or(defaults.key_prefix),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Short-lived entries for rapidly changing collections
    pub fn realtime() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            max_entries: 2_000,
            invalidate_on_write: true,
            invalidation_mode: InvalidationMode::Inline,
            ..Default::default()
        }
    }

    /// Collections refreshed by a daily batch
    pub fn daily() -> Self {
        Self {
            ttl: Duration::from_secs(23 * 3600),
            max_entries: 50_000,
            max_size_bytes: 500 * 1024 * 1024,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Reference data that almost never changes
    pub fn static_content() -> Self {
        Self {
            ttl: Duration::from_secs(48 * 3600),
            max_entries: 100_000,
            max_size_bytes: 1024 * 1024 * 1024,
            ttl_jitter: 0.05,
            ..Default::default()
        }
    }

    /// Configuration for memory-constrained environments
    pub fn small() -> Self {
        Self {
            max_entries: 100,
            max_size_bytes: 5 * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Configuration for large deployments
    pub fn large() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_entries: 1_000_000,
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }
}
