//! Cached Reads Demo Application
//!
//! Wraps a small in-process order book with the query cache and shows
//! population, hits and write-triggered scoped invalidation.
//!
//! Usage:
//!   cargo run --example cached_reads
//!
//! Environment variables (a `.env` file is honoured):
//!   REDIS_URL         - use Redis instead of the in-process backend
//!   RUST_LOG          - log filter (default: info,querycache=debug)

use async_trait::async_trait;
use querycache::{
    pointer, BackendConfig, CacheConfig, DataObject, InvalidationMode, InvalidationPolicy,
    ObjectStore, Query, QueryCache,
};
use serde_json::Value as JsonValue;
use std::convert::Infallible;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Orders kept in memory; every read is logged so hits are visible
struct OrderBook {
    orders: Mutex<Vec<DataObject>>,
}

impl OrderBook {
    fn matching(&self, query: &Query) -> Vec<DataObject> {
        info!("  -> order book queried: {:?}", query.where_clause);
        let customer = query
            .where_clause
            .get("Customer")
            .and_then(querycache::model::reference_id);

        self.orders
            .lock()
            .map(|orders| {
                orders
                    .iter()
                    .filter(|o| customer.is_none() || o.relation_id("Customer") == customer)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for OrderBook {
    type Error = Infallible;

    async fn get(&self, _class: &str, id: &str) -> Result<Option<DataObject>, Infallible> {
        Ok(self
            .matching(&Query::new("Order"))
            .into_iter()
            .find(|o| o.object_id.as_deref() == Some(id)))
    }

    async fn find(&self, query: &Query) -> Result<Vec<DataObject>, Infallible> {
        Ok(self.matching(query))
    }

    async fn find_all(&self, query: &Query) -> Result<Vec<DataObject>, Infallible> {
        Ok(self.matching(query))
    }

    async fn first(&self, query: &Query) -> Result<Option<DataObject>, Infallible> {
        Ok(self.matching(query).into_iter().next())
    }

    async fn count(&self, query: &Query) -> Result<u64, Infallible> {
        Ok(self.matching(query).len() as u64)
    }

    async fn distinct(&self, query: &Query, key: &str) -> Result<Vec<JsonValue>, Infallible> {
        let mut values: Vec<JsonValue> = self
            .matching(query)
            .iter()
            .filter_map(|o| o.get(key).cloned())
            .collect();
        values.dedup();
        Ok(values)
    }

    async fn aggregate(
        &self,
        _query: &Query,
        _pipeline: &JsonValue,
    ) -> Result<Vec<JsonValue>, Infallible> {
        Ok(Vec::new())
    }

    async fn save(&self, object: DataObject) -> Result<DataObject, Infallible> {
        if let Ok(mut orders) = self.orders.lock() {
            orders.push(object.clone());
        }
        Ok(object)
    }

    async fn save_all(&self, objects: Vec<DataObject>) -> Result<Vec<DataObject>, Infallible> {
        if let Ok(mut orders) = self.orders.lock() {
            orders.extend(objects.iter().cloned());
        }
        Ok(objects)
    }

    async fn destroy(&self, object: DataObject) -> Result<DataObject, Infallible> {
        if let Ok(mut orders) = self.orders.lock() {
            orders.retain(|o| o.object_id != object.object_id);
        }
        Ok(object)
    }

    async fn destroy_all(&self, objects: Vec<DataObject>) -> Result<Vec<DataObject>, Infallible> {
        for object in &objects {
            self.destroy(object.clone()).await?;
        }
        Ok(objects)
    }
}

fn order(id: &str, customer: &str, total: f64) -> DataObject {
    DataObject::with_id("Order", id)
        .field("Customer", pointer("Customer", customer))
        .field("total", total)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,querycache=debug")),
        )
        .init();

    info!("=== Query Cache Demo ===");

    let config = CacheConfig::builder()
        .ttl_ms(30_000)
        .invalidate_on_write(true)
        .invalidation_mode(InvalidationMode::Inline)
        .invalidation_policy(InvalidationPolicy::scoped(["Customer"]))
        .build();

    let cache = if std::env::var("REDIS_URL").is_ok() {
        QueryCache::init(config, &BackendConfig::from_env()?).await?
    } else {
        info!("REDIS_URL not set, using the in-process backend");
        QueryCache::in_memory(config)?
    };

    let book = OrderBook {
        orders: Mutex::new(vec![
            order("o1", "c1", 12.0),
            order("o2", "c1", 30.5),
            order("o3", "c2", 8.25),
        ]),
    };
    let orders = cache.wrap(book);

    let for_c1 = Query::new("Order").equal_to("Customer", "c1");
    let for_c2 = Query::new("Order").equal_to("Customer", "c2");

    info!("\n--- First reads populate the cache ---");
    info!("c1 orders: {}", orders.find(&for_c1).await?.len());
    info!("c2 orders: {}", orders.find(&for_c2).await?.len());

    info!("\n--- Repeated reads are answered by the cache ---");
    info!("c1 orders: {}", orders.find(&for_c1).await?.len());
    let c1_total = orders
        .reduce(&for_c1, 0.0, |sum, o| {
            sum + o.get("total").and_then(JsonValue::as_f64).unwrap_or(0.0)
        })
        .await?;
    info!("c1 total: {:.2}", c1_total);

    info!("\n--- Saving an order for c1 purges only c1 ---");
    orders.save(order("o4", "c1", 4.0)).await?;
    info!("c1 orders: {}", orders.find(&for_c1).await?.len());
    info!("c2 orders: {}", orders.find(&for_c2).await?.len());

    info!("\n--- Statistics ---");
    info!("{}", cache.stats());

    let health = cache.health_check().await;
    info!(
        "Backend health: {:?} ({}ms, {})",
        health.status, health.response_time_ms, health.backend
    );

    Ok(())
}
