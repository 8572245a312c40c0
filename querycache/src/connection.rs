//! Redis connection management and health check implementation
//!
//! This module provides the Redis-backed [`KvBackend`] used in production,
//! for a single node or a cluster, plus health checks with retry.

use crate::cache::backend::KvBackend;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, FromRedisValue};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const TLS_SCHEME: &str = "rediss://";

/// Where the Redis backend lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RedisTopology {
    /// One node, e.g. `redis://localhost:6379`
    Single { url: String },

    /// Cluster seed nodes; `rediss://` nodes connect over TLS
    Cluster { nodes: Vec<String> },
}

/// Connection settings for the Redis backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub topology: RedisTopology,

    /// Bound for establishing the connection and the initial ping
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::single(DEFAULT_REDIS_URL)
    }
}

impl BackendConfig {
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            topology: RedisTopology::Single { url: url.into() },
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Cluster over the given seed nodes
    ///
    /// Managed clusters usually require TLS: give the nodes as
    /// `rediss://host:port`. The same scheme works for [`single`](Self::single).
    pub fn cluster<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topology: RedisTopology::Cluster {
                nodes: nodes.into_iter().map(Into::into).collect(),
            },
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self.topology, RedisTopology::Cluster { .. })
    }

    /// Whether every configured node is addressed with `rediss://`
    pub fn uses_tls(&self) -> bool {
        match &self.topology {
            RedisTopology::Single { url } => url.starts_with(TLS_SCHEME),
            RedisTopology::Cluster { nodes } => {
                !nodes.is_empty() && nodes.iter().all(|n| n.starts_with(TLS_SCHEME))
            }
        }
    }

    /// Read `REDIS_URL`, `REDIS_CLUSTER`, `REDIS_NODES` and
    /// `REDIS_CONNECT_TIMEOUT_MS`
    ///
    /// With `REDIS_CLUSTER` set to a true value, `REDIS_NODES` (comma
    /// separated) must name at least one node.
    pub fn from_env() -> Result<Self> {
        let cluster = std::env::var("REDIS_CLUSTER")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let mut config = if cluster {
            let nodes: Vec<String> = std::env::var("REDIS_NODES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            if nodes.is_empty() {
                return Err(CacheError::ConfigError(
                    "REDIS_CLUSTER is set but REDIS_NODES is empty".to_string(),
                ));
            }
            Self::cluster(nodes)
        } else {
            Self::single(
                std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            )
        };

        if let Ok(raw) = std::env::var("REDIS_CONNECT_TIMEOUT_MS") {
            let ms = raw.trim().parse::<u64>().map_err(|_| {
                CacheError::ConfigError(format!(
                    "REDIS_CONNECT_TIMEOUT_MS is not a number: {}",
                    raw
                ))
            })?;
            config.connect_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

/// Configuration for health check behavior
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Timeout for a single ping
    pub timeout: Duration,
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay between retry attempts
    pub retry_delay: Duration,
    /// Response time threshold for degraded state (in milliseconds)
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
            degraded_threshold_ms: 100,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Backend is healthy and responsive
    Healthy,
    /// Backend is responsive but slow (above degraded threshold)
    Degraded,
    /// Backend is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    /// Backend name (`redis`, `redis-cluster`, `memory`)
    pub backend: String,
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
    /// Retries needed before this result
    pub retry_count: u32,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, backend: &str, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            backend: backend.to_string(),
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn unhealthy(response_time: Duration, backend: &str, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            backend: backend.to_string(),
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }
}

/// Ping a backend, retrying while it is unhealthy
///
/// Always returns a result; failures are reported through its status.
pub async fn health_check_with_retry(
    backend: &dyn KvBackend,
    config: &HealthCheckConfig,
) -> HealthCheckResult {
    let mut retry_count = 0;

    loop {
        let start = Instant::now();

        let mut result = match tokio::time::timeout(config.timeout, backend.ping()).await {
            Ok(Ok(())) => HealthCheckResult::healthy(
                start.elapsed(),
                backend.name(),
                config.degraded_threshold_ms,
            ),
            Ok(Err(e)) => {
                HealthCheckResult::unhealthy(start.elapsed(), backend.name(), &e.to_string())
            }
            Err(_) => HealthCheckResult::unhealthy(
                start.elapsed(),
                backend.name(),
                &format!("ping timed out after {:?}", config.timeout),
            ),
        };

        // If healthy or we've exhausted retries, return the result
        if result.status.is_operational() || retry_count >= config.max_retries {
            result.retry_count = retry_count;
            return result;
        }

        retry_count += 1;
        warn!(
            "Health check failed (attempt {}/{}), retrying after {:?}",
            retry_count,
            config.max_retries + 1,
            config.retry_delay
        );
        tokio::time::sleep(config.retry_delay).await;
    }
}

/// Live connection to a node or a cluster
#[derive(Clone)]
enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Redis-backed key-value store
///
/// Values are plain strings with `EX` expiry, namespace indices are lists.
/// The connection handles are multiplexed and cheap to clone, so each command
/// runs on its own clone without locking.
#[derive(Clone)]
pub struct RedisBackend {
    conn: RedisConnection,
}

impl RedisBackend {
    /// Connect and verify the backend answers a ping
    ///
    /// Any failure, including exceeding `connect_timeout`, is reported as
    /// [`CacheError::BackendUnavailable`].
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let connect = async {
            let conn = match &config.topology {
                RedisTopology::Single { url } => {
                    info!("Connecting to Redis (single node, tls: {})", config.uses_tls());
                    let client = redis::Client::open(url.as_str())?;
                    RedisConnection::Single(ConnectionManager::new(client).await?)
                }
                RedisTopology::Cluster { nodes } => {
                    info!(
                        "Connecting to Redis cluster ({} seed nodes, tls: {})",
                        nodes.len(),
                        config.uses_tls()
                    );
                    let client = ClusterClient::new(nodes.clone())?;
                    RedisConnection::Cluster(client.get_async_connection().await?)
                }
            };

            let backend = Self { conn };
            backend.ping().await?;
            Ok::<_, CacheError>(backend)
        };

        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(backend)) => {
                info!("Connected to {}", backend.name());
                Ok(backend)
            }
            Ok(Err(e)) => Err(CacheError::BackendUnavailable(e.to_string())),
            Err(_) => Err(CacheError::BackendUnavailable(format!(
                "connection not established within {:?}",
                config.connect_timeout
            ))),
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self.conn, RedisConnection::Cluster(_))
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let value = match &self.conn {
            RedisConnection::Single(conn) => cmd.query_async(&mut conn.clone()).await?,
            RedisConnection::Cluster(conn) => cmd.query_async(&mut conn.clone()).await?,
        };
        Ok(value)
    }
}

/// Redis expiry in whole seconds, rounded up, never below one
fn expiry_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.query::<()>(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(expiry_secs(ttl)),
        )
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: u64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn list_push(&self, list: &str, member: &str) -> Result<()> {
        let _len: u64 = self.query(redis::cmd("RPUSH").arg(list).arg(member)).await?;
        Ok(())
    }

    async fn list_members(&self, list: &str) -> Result<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(list).arg(0).arg(-1)).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        if self.is_cluster() {
            // Keys may hash to different slots; a multi-key DEL would be rejected
            let mut removed = 0;
            for key in keys {
                removed += self.query::<u64>(redis::cmd("DEL").arg(key)).await?;
            }
            return Ok(removed);
        }

        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn ping(&self) -> Result<()> {
        let pong: String = self.query(&redis::cmd("PING")).await?;
        debug!("PING -> {}", pong);
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.conn {
            RedisConnection::Single(_) => "redis",
            RedisConnection::Cluster(_) => "redis-cluster",
        }
    }
}
