//! Router data model (§3): roles, routed messages, endpoints and rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Si,
    App,
    Hybrid,
    HybridCoordinator,
    Core,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Si, Role::App, Role::Hybrid, Role::HybridCoordinator, Role::Core];

    pub fn as_event_scope(&self) -> mr_event_bus::EventScope {
        match self {
            Role::Si => mr_event_bus::EventScope::SiServices,
            Role::App => mr_event_bus::EventScope::AppServices,
            Role::Hybrid | Role::HybridCoordinator => mr_event_bus::EventScope::Hybrid,
            Role::Core => mr_event_bus::EventScope::Global,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Event,
    Command,
    Query,
    Response,
    Notification,
    Alert,
}

/// Maps an operation name to its message type by prefix, per §4.4.
pub fn infer_message_type(operation: &str) -> MessageType {
    const QUERY_PREFIXES: &[&str] =
        &["get_", "list_", "retrieve_", "fetch_", "check_", "status", "health", "info", "dashboard"];
    const COMMAND_PREFIXES: &[&str] = &[
        "create_", "submit_", "update_", "delete_", "process_", "generate_", "sync_", "register_",
        "validate_", "authenticate", "refresh",
    ];
    const EVENT_PREFIXES: &[&str] = &["notify_", "alert_", "broadcast_"];

    if QUERY_PREFIXES.iter().any(|p| operation.starts_with(p)) {
        MessageType::Query
    } else if COMMAND_PREFIXES.iter().any(|p| operation.starts_with(p)) {
        MessageType::Command
    } else if EVENT_PREFIXES.iter().any(|p| operation.starts_with(p)) {
        MessageType::Event
    } else {
        MessageType::Command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStrategy {
    Broadcast,
    RoundRobin,
    Priority,
    Failover,
    LoadBalanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    Healthy,
    Stale,
    Unhealthy,
}

/// Invoked for endpoints that register an in-process callback instead of
/// a remote URL.
#[async_trait]
pub trait Deliverable: Send + Sync {
    async fn deliver(
        &self,
        operation: &str,
        payload: &serde_json::Value,
        context: &DeliveryContext,
    ) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub source_service: String,
    pub message_type: MessageType,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub url: Option<String>,
    #[serde(skip)]
    pub callback: Option<Arc<dyn Deliverable>>,
    pub priority: i32,
    pub active: bool,
    pub load_factor: f64,
    pub last_activity: DateTime<Utc>,
    pub health: EndpointHealth,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("active", &self.active)
            .field("health", &self.health)
            .finish()
    }
}

impl ServiceEndpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        role: Role,
        url: Option<String>,
        callback: Option<Arc<dyn Deliverable>>,
        priority: i32,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role,
            url,
            callback,
            priority,
            active: true,
            load_factor: 1.0,
            last_activity: Utc::now(),
            health: EndpointHealth::Healthy,
            tags,
            metadata,
        }
    }

    pub fn advertised_operations(&self) -> Vec<String> {
        self.metadata
            .get("operations")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
            .unwrap_or_default()
    }

    fn metadata_f64(&self, key: &str) -> f64 {
        self.metadata.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    /// `0.4·rpm + 0.3·avg_rt + 20·error_rate + 0.1·active_conns`, divided
    /// by `load_factor`.
    pub fn load_score(&self) -> f64 {
        let rpm = self.metadata_f64("requests_per_minute");
        let avg_rt = self.metadata_f64("avg_response_time_ms");
        let error_rate = self.metadata_f64("error_rate");
        let active_conns = self.metadata_f64("active_connections");
        let raw = 0.4 * rpm + 0.3 * avg_rt + 20.0 * error_rate + 0.1 * active_conns;
        if self.load_factor.abs() < f64::EPSILON {
            raw
        } else {
            raw / self.load_factor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub source_pattern: String,
    pub target_pattern: String,
    pub message_pattern: String,
    pub source_role: Option<Role>,
    pub target_role: Option<Role>,
    pub strategy: DeliveryStrategy,
    pub priority: i32,
    pub conditions: HashMap<String, serde_json::Value>,
    pub transformations: Vec<String>,
    pub filters: HashMap<String, serde_json::Value>,
}

impl RoutingRule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_pattern: impl Into<String>,
        target_pattern: impl Into<String>,
        message_pattern: impl Into<String>,
        source_role: Option<Role>,
        target_role: Option<Role>,
        strategy: DeliveryStrategy,
        priority: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_pattern: source_pattern.into(),
            target_pattern: target_pattern.into(),
            message_pattern: message_pattern.into(),
            source_role,
            target_role,
            strategy,
            priority,
            conditions: HashMap::new(),
            transformations: Vec::new(),
            filters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedMessage {
    pub id: String,
    pub message_type: MessageType,
    pub operation: String,
    pub payload: serde_json::Value,
    pub source_service: String,
    pub source_role: Option<Role>,
    pub target_services: Option<Vec<String>>,
    pub target_role: Option<Role>,
    pub priority: i32,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub route_history: Vec<String>,
}

impl RoutedMessage {
    pub fn record_visit(&mut self, endpoint_id: impl Into<String>) {
        self.route_history.push(endpoint_id.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRoute {
    pub message_id: String,
    pub endpoint_id: String,
    pub expiry: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_query_command_event_and_default_command() {
        assert_eq!(infer_message_type("get_invoice"), MessageType::Query);
        assert_eq!(infer_message_type("health"), MessageType::Query);
        assert_eq!(infer_message_type("create_invoice"), MessageType::Command);
        assert_eq!(infer_message_type("refresh"), MessageType::Command);
        assert_eq!(infer_message_type("notify_user"), MessageType::Event);
        assert_eq!(infer_message_type("unlisted_operation"), MessageType::Command);
    }

    #[test]
    fn load_score_divides_by_load_factor() {
        let mut endpoint = ServiceEndpoint::new("svc", Role::Si, None, None, 0, vec![], HashMap::new());
        endpoint.metadata.insert("requests_per_minute".to_string(), serde_json::json!(10.0));
        endpoint.load_factor = 2.0;
        assert!((endpoint.load_score() - 2.0).abs() < 1e-9);
    }
}
