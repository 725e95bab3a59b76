//! `Router<B>` (§4.4/§4.5/§11): rule matching, strategy selection and
//! delivery, implemented once against the [`RouterBackend`] trait so the
//! in-memory (C4) and shared-store (C5) variants share one code path.

use crate::backend::{RouterBackend, RouterError};
use crate::types::{
    infer_message_type, ActiveRoute, DeliveryContext, DeliveryStrategy, Deliverable, EndpointHealth,
    MessageType, Role, RoutedMessage, RoutingRule, ServiceEndpoint,
};
use chrono::Utc;
use mr_event_bus::{EventBus, EventPriority};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RouterError>;

pub struct RouterConfig {
    pub production_mode_strict: bool,
    pub stale_after_seconds: i64,
    pub unhealthy_after_seconds: i64,
    pub load_balance_reset_interval_seconds: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            production_mode_strict: false,
            stale_after_seconds: 300,
            unhealthy_after_seconds: 600,
            load_balance_reset_interval_seconds: 60,
        }
    }
}

/// Production routing surface. Construct with [`crate::backend::InMemoryBackend`]
/// for C4 or [`crate::backend::RedisBackend`] for C5 — the logic below is
/// identical either way.
pub struct Router<B: RouterBackend> {
    backend: Arc<B>,
    config: RouterConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl<B: RouterBackend + 'static> Router<B> {
    pub fn new(backend: Arc<B>, config: RouterConfig, event_bus: Option<Arc<EventBus>>) -> Arc<Self> {
        let router = Arc::new(Self { backend, config, event_bus });
        {
            let router = router.clone();
            tokio::spawn(async move { router.health_monitor_loop().await });
        }
        {
            let router = router.clone();
            tokio::spawn(async move { router.load_balance_reset_loop().await });
        }
        router
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register_service(
        &self,
        name: impl Into<String>,
        role: Role,
        endpoint_url: Option<String>,
        callback: Option<Arc<dyn Deliverable>>,
        priority: i32,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        let endpoint = ServiceEndpoint::new(name, role, endpoint_url, callback, priority, tags, metadata);
        let id = endpoint.id.clone();
        self.backend.put_endpoint(&endpoint).await?;
        Ok(id)
    }

    pub async fn unregister_service(&self, endpoint_id: &str) -> Result<()> {
        self.backend.remove_endpoint(endpoint_id).await
    }

    pub async fn add_routing_rule(&self, rule: RoutingRule) -> Result<String> {
        let id = rule.id.clone();
        self.backend.put_rule(&rule).await?;
        Ok(id)
    }

    pub async fn remove_routing_rule(&self, id: &str) -> Result<()> {
        self.backend.remove_rule(id).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn route_message(
        &self,
        target_role: Role,
        operation: &str,
        payload: serde_json::Value,
        priority: i32,
        tenant_id: Option<String>,
        correlation_id: Option<String>,
        source_service: impl Into<String>,
    ) -> Result<serde_json::Value> {
        let message_type = infer_message_type(operation);
        let source_service = source_service.into();
        let mut message = RoutedMessage {
            id: Uuid::new_v4().to_string(),
            message_type,
            operation: operation.to_string(),
            payload,
            source_service: source_service.clone(),
            source_role: None,
            target_services: None,
            target_role: Some(target_role),
            priority,
            tenant_id,
            correlation_id,
            expiry: None,
            created_at: Utc::now(),
            route_history: Vec::new(),
        };

        let all_rules = self.backend.rules().await?;
        let mut applicable: Vec<&RoutingRule> = all_rules
            .iter()
            .filter(|rule| self.rule_applies(rule, &message, target_role))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

        if applicable.is_empty() {
            return self.fail_or_escalate(RouterError::NoApplicableRule);
        }

        for rule in applicable {
            let endpoints = self.backend.endpoints_for_role(target_role).await?;
            let candidates: Vec<ServiceEndpoint> = endpoints
                .into_iter()
                .filter(|ep| ep.active && glob_or_exact(&rule.target_pattern, &ep.name))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            match self.execute_strategy(rule, &candidates, &mut message).await {
                Ok(response) if !is_empty_response(&response) => return Ok(response),
                _ => continue,
            }
        }

        self.fail_or_escalate(RouterError::AllEndpointsFailed)
    }

    pub async fn route_to_role(
        &self,
        target_role: Role,
        operation: &str,
        payload: serde_json::Value,
        priority: i32,
        source_service: impl Into<String>,
    ) -> Result<serde_json::Value> {
        self.route_message(target_role, operation, payload, priority, None, None, source_service).await
    }

    pub async fn route_to_service(
        &self,
        target_role: Role,
        target_service: &str,
        operation: &str,
        payload: serde_json::Value,
        source_service: impl Into<String>,
    ) -> Result<serde_json::Value> {
        let endpoints = self.backend.endpoints_for_role(target_role).await?;
        let endpoint = endpoints
            .into_iter()
            .find(|e| e.name == target_service)
            .ok_or_else(|| RouterError::EndpointNotFound(target_service.to_string()))?;
        let mut message = RoutedMessage {
            id: Uuid::new_v4().to_string(),
            message_type: infer_message_type(operation),
            operation: operation.to_string(),
            payload,
            source_service: source_service.into(),
            source_role: None,
            target_services: Some(vec![target_service.to_string()]),
            target_role: Some(target_role),
            priority: 0,
            tenant_id: None,
            correlation_id: None,
            expiry: None,
            created_at: Utc::now(),
            route_history: Vec::new(),
        };
        self.deliver_to_one(&endpoint, &mut message).await
    }

    fn rule_applies(&self, rule: &RoutingRule, message: &RoutedMessage, target_role: Role) -> bool {
        if let Some(source_role) = rule.source_role {
            if Some(source_role) != message.source_role {
                return false;
            }
        }
        if let Some(rule_target_role) = rule.target_role {
            if rule_target_role != target_role {
                return false;
            }
        }
        if !glob_or_exact(&rule.source_pattern, &message.source_service) {
            return false;
        }
        let message_type_str = format!("{:?}", message.message_type).to_lowercase();
        if !glob_or_exact(&rule.message_pattern, &message_type_str) {
            return false;
        }
        if !conditions_match(&rule.conditions, &message.payload) {
            return false;
        }
        if !filters_match(&rule.filters, message) {
            return false;
        }
        true
    }

    async fn execute_strategy(
        &self,
        rule: &RoutingRule,
        candidates: &[ServiceEndpoint],
        message: &mut RoutedMessage,
    ) -> Result<serde_json::Value> {
        match rule.strategy {
            DeliveryStrategy::Broadcast => self.broadcast(candidates, message).await,
            DeliveryStrategy::RoundRobin => self.round_robin(rule, candidates, message).await,
            DeliveryStrategy::Priority => self.priority(candidates, message).await,
            DeliveryStrategy::LoadBalanced => self.load_balanced(candidates, message).await,
            DeliveryStrategy::Failover => self.failover(candidates, message).await,
        }
    }

    async fn broadcast(&self, candidates: &[ServiceEndpoint], message: &mut RoutedMessage) -> Result<serde_json::Value> {
        let mut responses = Vec::new();
        for endpoint in candidates {
            if let Ok(response) = self.deliver_to_one(endpoint, message).await {
                responses.push(response);
            }
        }
        Ok(merge_responses(responses))
    }

    async fn round_robin(
        &self,
        rule: &RoutingRule,
        candidates: &[ServiceEndpoint],
        message: &mut RoutedMessage,
    ) -> Result<serde_json::Value> {
        let idx = self.backend.next_round_robin(&rule.id, candidates.len()).await?;
        self.deliver_to_one(&candidates[idx], message).await
    }

    async fn priority(&self, candidates: &[ServiceEndpoint], message: &mut RoutedMessage) -> Result<serde_json::Value> {
        let mut sorted: Vec<&ServiceEndpoint> = candidates.iter().collect();
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
        for endpoint in sorted {
            if let Ok(response) = self.deliver_to_one(endpoint, message).await {
                return Ok(response);
            }
        }
        Err(RouterError::AllEndpointsFailed)
    }

    async fn load_balanced(&self, candidates: &[ServiceEndpoint], message: &mut RoutedMessage) -> Result<serde_json::Value> {
        let endpoint = candidates
            .iter()
            .min_by(|a, b| a.load_score().partial_cmp(&b.load_score()).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or(RouterError::AllEndpointsFailed)?;
        self.deliver_to_one(endpoint, message).await
    }

    async fn failover(&self, candidates: &[ServiceEndpoint], message: &mut RoutedMessage) -> Result<serde_json::Value> {
        let mut sorted: Vec<&ServiceEndpoint> = candidates.iter().collect();
        sorted.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| health_rank(a.health).cmp(&health_rank(b.health)))
        });
        for endpoint in sorted {
            if let Ok(response) = self.deliver_to_one(endpoint, message).await {
                return Ok(response);
            }
        }
        Err(RouterError::AllEndpointsFailed)
    }

    async fn deliver_to_one(&self, endpoint: &ServiceEndpoint, message: &mut RoutedMessage) -> Result<serde_json::Value> {
        let operations = endpoint.advertised_operations();
        if !operations.is_empty() && !operations.iter().any(|op| op == &message.operation) {
            warn!(endpoint = %endpoint.name, operation = %message.operation, "operation not advertised by endpoint");
        }

        let context = DeliveryContext {
            source_service: message.source_service.clone(),
            message_type: message.message_type,
            tenant_id: message.tenant_id.clone(),
            correlation_id: message.correlation_id.clone(),
        };

        let result = if let Some(callback) = &endpoint.callback {
            callback.deliver(&message.operation, &message.payload, &context).await.map_err(|e| RouterError::DeliveryFailed(e.to_string()))
        } else if let Some(bus) = &self.event_bus {
            let event_type = format!("message.{:?}", message.message_type).to_lowercase();
            bus.emit(event_type, message.payload.clone(), &message.source_service, endpoint.role.as_event_scope(), EventPriority::Normal);
            Ok(serde_json::json!({"status": "emitted"}))
        } else {
            Err(RouterError::DeliveryFailed("endpoint has no callback and no event bus is configured".to_string()))
        };

        if result.is_ok() {
            message.record_visit(endpoint.id.clone());
            let _ = self
                .backend
                .record_route(
                    &message.id,
                    &ActiveRoute {
                        message_id: message.id.clone(),
                        endpoint_id: endpoint.id.clone(),
                        expiry: Utc::now() + chrono::Duration::minutes(10),
                    },
                )
                .await;
        }
        result
    }

    fn fail_or_escalate(&self, err: RouterError) -> Result<serde_json::Value> {
        Err(err)
    }

    async fn health_monitor_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let now = Utc::now();
            for role in Role::ALL {
                let Ok(endpoints) = self.backend.endpoints_for_role(role).await else { continue };
                for mut endpoint in endpoints {
                    let idle_seconds = (now - endpoint.last_activity).num_seconds();
                    let new_health = if idle_seconds > self.config.unhealthy_after_seconds {
                        EndpointHealth::Unhealthy
                    } else if idle_seconds > self.config.stale_after_seconds {
                        EndpointHealth::Stale
                    } else {
                        EndpointHealth::Healthy
                    };
                    if new_health != endpoint.health {
                        endpoint.health = new_health;
                        if matches!(new_health, EndpointHealth::Unhealthy) {
                            endpoint.active = false;
                        }
                        let _ = self.backend.put_endpoint(&endpoint).await;
                        info!(endpoint = %endpoint.name, health = ?new_health, "endpoint health transition");
                    }
                }
            }
        }
    }

    async fn load_balance_reset_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.load_balance_reset_interval_seconds));
        loop {
            ticker.tick().await;
            for role in Role::ALL {
                let Ok(endpoints) = self.backend.endpoints_for_role(role).await else { continue };
                for mut endpoint in endpoints {
                    if endpoint.metadata.contains_key("requests_per_minute") {
                        endpoint.metadata.insert("requests_per_minute".to_string(), serde_json::json!(0.0));
                        let _ = self.backend.put_endpoint(&endpoint).await;
                    }
                }
            }
        }
    }
}

fn health_rank(health: EndpointHealth) -> u8 {
    match health {
        EndpointHealth::Healthy => 0,
        EndpointHealth::Stale => 1,
        EndpointHealth::Unhealthy => 2,
    }
}

fn glob_or_exact(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value || mr_event_bus::glob_match(pattern, value)
}

fn conditions_match(conditions: &HashMap<String, serde_json::Value>, payload: &serde_json::Value) -> bool {
    conditions.iter().all(|(key, expected)| payload.get(key).map(|actual| actual == expected).unwrap_or(false))
}

fn filters_match(filters: &HashMap<String, serde_json::Value>, message: &RoutedMessage) -> bool {
    filters.iter().all(|(key, expected)| match key.as_str() {
        "tenant_id" => message.tenant_id.as_deref().map(|t| expected.as_str() == Some(t)).unwrap_or(false),
        "priority_at_least" => expected.as_i64().map(|min| message.priority as i64 >= min).unwrap_or(true),
        _ => true,
    })
}

fn is_empty_response(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::Null) || (value.is_object() && value.as_object().unwrap().is_empty())
}

/// Aggregates broadcast responses per §4.4: a single response passes
/// through; multiple are merged into a `merged_responses` envelope with
/// concatenated `data` arrays.
fn merge_responses(responses: Vec<serde_json::Value>) -> serde_json::Value {
    match responses.len() {
        0 => serde_json::Value::Null,
        1 => responses.into_iter().next().unwrap(),
        _ => {
            let mut merged_data = Vec::new();
            for response in &responses {
                if let Some(data) = response.get("data").and_then(|d| d.as_array()) {
                    merged_data.extend(data.iter().cloned());
                }
            }
            serde_json::json!({
                "status": "success",
                "merged_responses": true,
                "response_count": responses.len(),
                "responses": responses,
                "data": merged_data,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use async_trait::async_trait;

    struct EchoCallback;

    #[async_trait]
    impl Deliverable for EchoCallback {
        async fn deliver(&self, operation: &str, payload: &serde_json::Value, _context: &DeliveryContext) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({"operation": operation, "echo": payload}))
        }
    }

    #[tokio::test]
    async fn round_robin_rule_alternates_between_two_endpoints() {
        let backend = InMemoryBackend::new();
        let router = Router::new(backend.clone(), RouterConfig::default(), None);
        let e1 = router.register_service("si-a", Role::Si, None, Some(Arc::new(EchoCallback)), 0, vec![], HashMap::new()).await.unwrap();
        let e2 = router.register_service("si-b", Role::Si, None, Some(Arc::new(EchoCallback)), 0, vec![], HashMap::new()).await.unwrap();
        let _ = (e1, e2);
        router
            .add_routing_rule(RoutingRule::new("*", "*", "*", None, Some(Role::Si), DeliveryStrategy::RoundRobin, 0))
            .await
            .unwrap();

        let r1 = router.route_message(Role::Si, "get_status", serde_json::json!({}), 0, None, None, "gateway").await.unwrap();
        let r2 = router.route_message(Role::Si, "get_status", serde_json::json!({}), 0, None, None, "gateway").await.unwrap();
        assert_ne!(r1["operation"], serde_json::Value::Null);
        assert_ne!(r2, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn no_applicable_rule_fails_in_production_mode() {
        let backend = InMemoryBackend::new();
        let router = Router::new(backend, RouterConfig { production_mode_strict: true, ..Default::default() }, None);
        let result = router.route_message(Role::Si, "get_status", serde_json::json!({}), 0, None, None, "gateway").await;
        assert!(matches!(result, Err(RouterError::NoApplicableRule)));
    }

    #[tokio::test]
    async fn broadcast_merges_multiple_endpoint_responses() {
        let backend = InMemoryBackend::new();
        let router = Router::new(backend, RouterConfig::default(), None);
        router.register_service("app-a", Role::App, None, Some(Arc::new(EchoCallback)), 0, vec![], HashMap::new()).await.unwrap();
        router.register_service("app-b", Role::App, None, Some(Arc::new(EchoCallback)), 0, vec![], HashMap::new()).await.unwrap();
        router
            .add_routing_rule(RoutingRule::new("*", "*", "*", None, Some(Role::App), DeliveryStrategy::Broadcast, 0))
            .await
            .unwrap();
        let response = router.route_message(Role::App, "create_invoice", serde_json::json!({}), 0, None, None, "gateway").await.unwrap();
        assert_eq!(response["merged_responses"], true);
        assert_eq!(response["response_count"], 2);
    }
}
