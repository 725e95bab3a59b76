//! Wraps whichever [`mr_message_router::Router`] the deployment is running
//! (in-process C4 or shared-store C5) behind one call surface, so the rest
//! of the composition root doesn't need to be generic over the backend.

use mr_message_router::{InMemoryBackend, RedisBackend, Role, Router, RouterConfig, RouterError};
use mr_shared_store::RedisStore;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, RouterError>;

/// C5 is C4's router constructed against a shared-store backend rather than
/// a second implementation (§9) — this enum exists only because `Router<B>`
/// is generic and the two backends need a common handle at the call sites
/// that don't care which one is live.
pub enum RouterHandle {
    InMemory(Arc<Router<InMemoryBackend>>),
    Redis(Arc<Router<RedisBackend<RedisStore>>>),
}

impl RouterHandle {
    pub fn in_memory(config: RouterConfig, event_bus: Option<Arc<mr_event_bus::EventBus>>) -> Self {
        Self::InMemory(Router::new(InMemoryBackend::new(), config, event_bus))
    }

    pub fn redis(
        store: Arc<RedisStore>,
        config: RouterConfig,
        event_bus: Option<Arc<mr_event_bus::EventBus>>,
    ) -> Self {
        Self::Redis(Router::new(RedisBackend::new(store), config, event_bus))
    }

    pub async fn install_default_rules(&self) -> anyhow::Result<()> {
        match self {
            Self::InMemory(router) => mr_message_router::install_default_rules(router).await,
            Self::Redis(router) => mr_message_router::install_default_rules(router).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register_service(
        &self,
        name: impl Into<String>,
        role: Role,
        endpoint_url: Option<String>,
        callback: Option<Arc<dyn mr_message_router::Deliverable>>,
        priority: i32,
        tags: Vec<String>,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        match self {
            Self::InMemory(router) => {
                router.register_service(name, role, endpoint_url, callback, priority, tags, metadata).await
            }
            Self::Redis(router) => {
                router.register_service(name, role, endpoint_url, callback, priority, tags, metadata).await
            }
        }
    }

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
        match self {
            Self::InMemory(router) => {
                router.route_message(target_role, operation, payload, priority, tenant_id, correlation_id, source_service).await
            }
            Self::Redis(router) => {
                router.route_message(target_role, operation, payload, priority, tenant_id, correlation_id, source_service).await
            }
        }
    }

    pub async fn add_routing_rule(&self, rule: mr_message_router::RoutingRule) -> Result<String> {
        match self {
            Self::InMemory(router) => router.add_routing_rule(rule).await,
            Self::Redis(router) => router.add_routing_rule(rule).await,
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Self::Redis(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mr_message_router::{DeliveryContext, Deliverable};
    use std::collections::HashMap;

    struct EchoCallback;

    #[async_trait]
    impl Deliverable for EchoCallback {
        async fn deliver(
            &self,
            operation: &str,
            payload: &serde_json::Value,
            _context: &DeliveryContext,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "operation": operation, "echo": payload }))
        }
    }

    #[tokio::test]
    async fn in_memory_handle_installs_defaults_and_routes() {
        let handle = RouterHandle::in_memory(RouterConfig::default(), None);
        assert!(!handle.is_distributed());
        handle.install_default_rules().await.unwrap();

        handle
            .register_service("si_a", Role::Si, None, Some(Arc::new(EchoCallback)), 0, vec![], HashMap::new())
            .await
            .unwrap();

        let response = handle
            .route_message(Role::Si, "get_status", serde_json::json!({}), 0, None, None, "api_gateway")
            .await
            .unwrap();
        assert_eq!(response["operation"], "get_status");
    }
}
