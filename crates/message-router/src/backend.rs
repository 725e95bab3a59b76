//! The `RouterBackend` capability (§9/§11): composition replacement for
//! the source's `RedisMessageRouter extends MessageRouter` inheritance.
//! `InMemoryBackend` backs C4; `RedisBackend` backs C5. `Router<B>` in
//! `router.rs` runs identical routing logic against either.

use crate::types::{ActiveRoute, Role, RoutingRule, ServiceEndpoint};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mr_shared_store::{keys, SharedStore, SharedStoreJsonExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no applicable routing rule for operation")]
    NoApplicableRule,
    #[error("all matching endpoints failed delivery")]
    AllEndpointsFailed,
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("circuit open for endpoint '{0}'")]
    CircuitOpen(String),
    #[error("endpoint '{0}' not found")]
    EndpointNotFound(String),
    #[error("router backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[async_trait]
pub trait RouterBackend: Send + Sync {
    async fn put_endpoint(&self, ep: &ServiceEndpoint) -> Result<()>;
    async fn remove_endpoint(&self, id: &str) -> Result<()>;
    async fn endpoints_for_role(&self, role: Role) -> Result<Vec<ServiceEndpoint>>;
    async fn put_rule(&self, rule: &RoutingRule) -> Result<()>;
    async fn remove_rule(&self, id: &str) -> Result<()>;
    async fn rules(&self) -> Result<Vec<RoutingRule>>;
    async fn record_route(&self, msg_id: &str, record: &ActiveRoute) -> Result<()>;
    async fn next_round_robin(&self, rule_id: &str, modulus: usize) -> Result<usize>;
    fn instance_id(&self) -> &str;
}

/// C4's in-memory table, keyed by `dashmap`.
pub struct InMemoryBackend {
    instance_id: String,
    endpoints: DashMap<String, ServiceEndpoint>,
    rules: DashMap<String, RoutingRule>,
    active_routes: DashMap<String, ActiveRoute>,
    round_robin_counters: DashMap<String, AtomicUsize>,
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            instance_id: Uuid::new_v4().to_string(),
            endpoints: DashMap::new(),
            rules: DashMap::new(),
            active_routes: DashMap::new(),
            round_robin_counters: DashMap::new(),
        })
    }

    pub fn active_routes_snapshot(&self) -> Vec<ActiveRoute> {
        self.active_routes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn expire_active_routes(&self) {
        let now = Utc::now();
        self.active_routes.retain(|_, route| route.expiry > now);
    }
}

#[async_trait]
impl RouterBackend for InMemoryBackend {
    async fn put_endpoint(&self, ep: &ServiceEndpoint) -> Result<()> {
        self.endpoints.insert(ep.id.clone(), ep.clone());
        Ok(())
    }

    async fn remove_endpoint(&self, id: &str) -> Result<()> {
        self.endpoints.remove(id);
        Ok(())
    }

    async fn endpoints_for_role(&self, role: Role) -> Result<Vec<ServiceEndpoint>> {
        Ok(self.endpoints.iter().filter(|e| e.role == role).map(|e| e.value().clone()).collect())
    }

    async fn put_rule(&self, rule: &RoutingRule) -> Result<()> {
        self.rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn remove_rule(&self, id: &str) -> Result<()> {
        self.rules.remove(id);
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<RoutingRule>> {
        Ok(self.rules.iter().map(|e| e.value().clone()).collect())
    }

    async fn record_route(&self, msg_id: &str, record: &ActiveRoute) -> Result<()> {
        self.active_routes.insert(msg_id.to_string(), record.clone());
        Ok(())
    }

    async fn next_round_robin(&self, rule_id: &str, modulus: usize) -> Result<usize> {
        if modulus == 0 {
            return Ok(0);
        }
        let counter = self.round_robin_counters.entry(rule_id.to_string()).or_insert_with(|| AtomicUsize::new(0));
        Ok(counter.fetch_add(1, Ordering::Relaxed) % modulus)
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// C5: mirrors every table to the shared key-value store under
/// `taxpoynt:message_router`, with a local write-through/read-through
/// cache bounded by a TTL (§4.5).
pub struct RedisBackend<S: SharedStore> {
    instance_id: String,
    store: Arc<S>,
    endpoint_cache: DashMap<String, (ServiceEndpoint, chrono::DateTime<Utc>)>,
    rule_cache: DashMap<String, (RoutingRule, chrono::DateTime<Utc>)>,
    cache_ttl: chrono::Duration,
}

impl<S: SharedStore> RedisBackend<S> {
    pub fn new(store: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            instance_id: Uuid::new_v4().to_string(),
            store,
            endpoint_cache: DashMap::new(),
            rule_cache: DashMap::new(),
            cache_ttl: chrono::Duration::seconds(60),
        })
    }

    fn cache_fresh(&self, cached_at: chrono::DateTime<Utc>) -> bool {
        Utc::now() - cached_at < self.cache_ttl
    }

    /// Registers this replica's heartbeat; call once at startup and then
    /// every 30s from the platform binary's background task.
    pub async fn heartbeat(&self) -> Result<()> {
        self.store
            .set_with_ttl(
                &keys::instance(&self.instance_id),
                &Utc::now().to_rfc3339(),
                std::time::Duration::from_secs(300),
            )
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))
    }
}

#[async_trait]
impl<S: SharedStore + 'static> RouterBackend for RedisBackend<S> {
    async fn put_endpoint(&self, ep: &ServiceEndpoint) -> Result<()> {
        self.store
            .hset_json(&keys::service_endpoints(), &ep.id, ep)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        self.endpoint_cache.insert(ep.id.clone(), (ep.clone(), Utc::now()));
        Ok(())
    }

    async fn remove_endpoint(&self, id: &str) -> Result<()> {
        self.store
            .hdel(&keys::service_endpoints(), id)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        self.endpoint_cache.remove(id);
        Ok(())
    }

    async fn endpoints_for_role(&self, role: Role) -> Result<Vec<ServiceEndpoint>> {
        let fresh_cached: Vec<ServiceEndpoint> = self
            .endpoint_cache
            .iter()
            .filter(|e| self.cache_fresh(e.value().1) && e.value().0.role == role)
            .map(|e| e.value().0.clone())
            .collect();
        if !fresh_cached.is_empty() {
            return Ok(fresh_cached);
        }
        let all: HashMap<String, ServiceEndpoint> = self
            .store
            .hgetall_json(&keys::service_endpoints())
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        let now = Utc::now();
        for (id, ep) in &all {
            self.endpoint_cache.insert(id.clone(), (ep.clone(), now));
        }
        Ok(all.into_values().filter(|e| e.role == role).collect())
    }

    async fn put_rule(&self, rule: &RoutingRule) -> Result<()> {
        self.store
            .hset_json(&keys::routing_rules(), &rule.id, rule)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        self.rule_cache.insert(rule.id.clone(), (rule.clone(), Utc::now()));
        Ok(())
    }

    async fn remove_rule(&self, id: &str) -> Result<()> {
        self.store
            .hdel(&keys::routing_rules(), id)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        self.rule_cache.remove(id);
        Ok(())
    }

    async fn rules(&self) -> Result<Vec<RoutingRule>> {
        let fresh_cached: Vec<RoutingRule> = self
            .rule_cache
            .iter()
            .filter(|e| self.cache_fresh(e.value().1))
            .map(|e| e.value().0.clone())
            .collect();
        if fresh_cached.len() == self.rule_cache.len() && !fresh_cached.is_empty() {
            return Ok(fresh_cached);
        }
        let all: HashMap<String, RoutingRule> = self
            .store
            .hgetall_json(&keys::routing_rules())
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        let now = Utc::now();
        for (id, rule) in &all {
            self.rule_cache.insert(id.clone(), (rule.clone(), now));
        }
        Ok(all.into_values().collect())
    }

    async fn record_route(&self, msg_id: &str, record: &ActiveRoute) -> Result<()> {
        self.store
            .hset_json(&keys::active_routes(), msg_id, record)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))
    }

    async fn next_round_robin(&self, rule_id: &str, modulus: usize) -> Result<usize> {
        if modulus == 0 {
            return Ok(0);
        }
        let key = keys::round_robin_state();
        let current: u64 = self
            .store
            .hget_json::<u64>(&key, rule_id)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?
            .unwrap_or(0);
        let next = current + 1;
        self.store
            .hset_json(&key, rule_id, &next)
            .await
            .map_err(|e| RouterError::Backend(e.to_string()))?;
        Ok((current as usize) % modulus)
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[tokio::test]
    async fn in_memory_backend_round_robin_increments_modulo() {
        let backend = InMemoryBackend::new();
        let picks: Vec<usize> = futures::future::join_all((0..5).map(|_| backend.next_round_robin("rule-1", 3)))
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);
    }

    #[tokio::test]
    async fn in_memory_backend_filters_endpoints_by_role() {
        let backend = InMemoryBackend::new();
        backend.put_endpoint(&ServiceEndpoint::new("si-svc", Role::Si, None, None, 0, vec![], StdHashMap::new())).await.unwrap();
        backend.put_endpoint(&ServiceEndpoint::new("app-svc", Role::App, None, None, 0, vec![], StdHashMap::new())).await.unwrap();
        let si_endpoints = backend.endpoints_for_role(Role::Si).await.unwrap();
        assert_eq!(si_endpoints.len(), 1);
        assert_eq!(si_endpoints[0].name, "si-svc");
    }
}
