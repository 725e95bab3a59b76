//! Bridges between `mr-resilience`'s store traits (which stay decoupled
//! from any concrete backend) and `mr-shared-store`'s Redis client, so the
//! circuit breaker and health checker mirror state the same way the
//! router's `RedisBackend` does.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mr_resilience::{CircuitBreakerStats, CircuitBreakerStore, HealthSnapshot, HealthStore};
use mr_shared_store::{keys, SharedStore, SharedStoreJsonExt};
use std::sync::Arc;
use std::time::Duration;

/// Mirrors one circuit breaker's state to `taxpoynt:circuit_breaker:<name>:state`
/// and its rolling failure timestamps to the sibling `:failures` sorted set.
pub struct RedisCircuitBreakerStore<S: SharedStore> {
    store: Arc<S>,
}

impl<S: SharedStore> RedisCircuitBreakerStore<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl<S: SharedStore + 'static> CircuitBreakerStore for RedisCircuitBreakerStore<S> {
    async fn save_state(&self, name: &str, stats: &CircuitBreakerStats) -> anyhow::Result<()> {
        let key = keys::circuit_breaker_state(name);
        self.store.hset_json(&key, "stats", stats).await?;
        self.store.expire(&key, Duration::from_secs(3600)).await?;
        Ok(())
    }

    async fn record_failure(&self, name: &str, at_unix_ms: i64) -> anyhow::Result<()> {
        let key = keys::circuit_breaker_failures(name);
        self.store.zadd(&key, &at_unix_ms.to_string(), at_unix_ms as f64).await?;
        Ok(())
    }

    async fn prune_failures(&self, name: &str, before_unix_ms: i64) -> anyhow::Result<()> {
        let key = keys::circuit_breaker_failures(name);
        self.store.zremrangebyscore(&key, f64::MIN, (before_unix_ms - 1) as f64).await?;
        Ok(())
    }
}

/// Mirrors the health-check aggregator's overall snapshot to
/// `taxpoynt:health_status` with the 5-minute TTL §6 specifies.
pub struct RedisHealthStore<S: SharedStore> {
    store: Arc<S>,
}

impl<S: SharedStore> RedisHealthStore<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl<S: SharedStore + 'static> HealthStore for RedisHealthStore<S> {
    async fn save_snapshot(&self, snapshot: &HealthSnapshot) -> anyhow::Result<()> {
        let key = keys::HEALTH_STATUS_KEY;
        self.store.hset_json(key, "overall", &snapshot.overall).await?;
        self.store.hset_json(key, "services", &snapshot.services).await?;
        let timestamp = snapshot
            .timestamp
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let as_rfc3339 = Utc.timestamp_opt(timestamp, 0).single().map(|t| t.to_rfc3339()).unwrap_or_default();
        self.store.hset(key, "timestamp", &as_rfc3339).await?;
        self.store.expire(key, Duration::from_secs(300)).await?;
        Ok(())
    }
}
