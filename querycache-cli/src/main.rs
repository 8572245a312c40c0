use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use querycache::cache::{decode, KvBackend};
use querycache::{BackendConfig, CacheConfig, CacheKey, Namespace, QueryCache};

#[derive(Parser)]
#[command(name = "querycache")]
#[command(about = "Inspect and purge the query cache in Redis", long_about = None)]
struct Cli {
    /// Redis URL (single node); use rediss:// for TLS
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Connect to a Redis cluster instead of a single node
    #[arg(long, env = "REDIS_CLUSTER")]
    cluster: bool,

    /// Cluster seed node, redis:// or rediss:// (repeatable)
    #[arg(long = "node", env = "REDIS_NODES", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Key prefix used by the application
    #[arg(long, env = "QUERYCACHE_KEY_PREFIX", default_value = "qc:")]
    prefix: String,

    /// Connection timeout in milliseconds
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the backend answers
    Ping,

    /// List the entries indexed under a namespace
    Inspect {
        /// Entity class
        #[arg(short, long)]
        class: String,

        /// Related record id for a scoped namespace
        #[arg(short, long)]
        scope: Option<String>,
    },

    /// Show a cached entry
    Get {
        /// Cache key (64 hex characters)
        key: String,
    },

    /// Purge a namespace
    Invalidate {
        /// Entity class
        #[arg(short, long)]
        class: String,

        /// Related record id for a scoped namespace
        #[arg(short, long)]
        scope: Option<String>,
    },
}

impl Cli {
    fn backend_config(&self) -> Result<BackendConfig> {
        let config = if self.cluster {
            if self.nodes.is_empty() {
                bail!("--cluster needs at least one --node");
            }
            BackendConfig::cluster(self.nodes.iter().cloned())
        } else {
            BackendConfig::single(self.redis_url.clone())
        };
        Ok(config.with_connect_timeout(std::time::Duration::from_millis(self.connect_timeout_ms)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "querycache=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = CacheConfig::from_env().context("invalid QUERYCACHE_* configuration")?;
    config.key_prefix = cli.prefix.clone();

    let cache = QueryCache::init(config, &cli.backend_config()?)
        .await
        .context("failed to connect to the cache backend")?;
    tracing::debug!(prefix = %cli.prefix, cluster = cli.cluster, "connected");

    match cli.command {
        Commands::Ping => {
            let result = cache.health_check().await;
            println!(
                "{:?} ({}, {}ms)",
                result.status, result.backend, result.response_time_ms
            );
            if let Some(error) = result.error {
                println!("Error: {}", error);
            }
            if !result.status.is_operational() {
                std::process::exit(1);
            }
        }

        Commands::Inspect { class, scope } => {
            let namespace = Namespace::for_class(&class, scope.as_deref());
            let store = cache.store();
            let members = store.indexed_keys(&namespace).await?;

            println!(
                "Namespace {} ({})",
                namespace,
                store.index_key(&namespace)
            );

            let mut live = 0;
            for member in &members {
                let alive = store.backend().exists(member).await?;
                if alive {
                    live += 1;
                }
                let key = member.strip_prefix(store.prefix()).unwrap_or(member);
                println!("  {} {}", if alive { "live " } else { "stale" }, key);
            }
            println!("{} indexed, {} live", members.len(), live);
        }

        Commands::Get { key } => {
            let key = CacheKey::parse(&key)
                .with_context(|| format!("not a cache key: {}", key))?;

            match cache.store().get(&key).await? {
                Some(bytes) => {
                    let result = decode(&bytes, None)
                        .with_context(|| format!("entry {} is corrupt", key))?;
                    let raw: serde_json::Value = serde_json::from_slice(&bytes)?;

                    println!(
                        "Shape: {} ({} objects, {} bytes)",
                        result.shape(),
                        result.object_count(),
                        bytes.len()
                    );
                    println!("{}", serde_json::to_string_pretty(&raw)?);
                }
                None => {
                    println!("No entry for {}", key);
                }
            }
        }

        Commands::Invalidate { class, scope } => {
            let removed = cache.invalidate(&class, scope.as_deref()).await?;
            println!(
                "Removed {} entries from {}",
                removed,
                Namespace::for_class(&class, scope.as_deref())
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_invalidate() {
        let cli = Cli::parse_from([
            "querycache",
            "--prefix",
            "app:",
            "invalidate",
            "--class",
            "Order",
            "--scope",
            "c1",
        ]);

        assert_eq!(cli.prefix, "app:");
        match cli.command {
            Commands::Invalidate { class, scope } => {
                assert_eq!(class, "Order");
                assert_eq!(scope.as_deref(), Some("c1"));
            }
            _ => panic!("expected invalidate"),
        }
    }

    #[test]
    fn test_cluster_requires_nodes() {
        let cli = Cli::parse_from(["querycache", "--cluster", "ping"]);
        if cli.nodes.is_empty() {
            assert!(cli.backend_config().is_err());
        }

        let cli = Cli::parse_from([
            "querycache",
            "--cluster",
            "--node",
            "redis://a:7000,redis://b:7001",
            "ping",
        ]);
        let config = cli.backend_config().unwrap();
        assert!(config.is_cluster());
    }
}
