//! Development-mode synthetic response fallback (§9 Design Notes).
//!
//! The production `Router` never references this: it always returns a
//! `RouterError` when no rule applies or every endpoint fails. This
//! wrapper is a test/dev-only decorator that callers outside production
//! mode may use to get a synthetic response instead of a hard failure.

use crate::backend::{RouterBackend, RouterError};
use crate::router::Router;
use crate::types::Role;
use std::sync::Arc;

pub struct DevFallbackRouter<B: RouterBackend> {
    inner: Arc<Router<B>>,
}

impl<B: RouterBackend + 'static> DevFallbackRouter<B> {
    pub fn new(inner: Arc<Router<B>>) -> Self {
        Self { inner }
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
    ) -> serde_json::Value {
        match self
            .inner
            .route_message(target_role, operation, payload, priority, tenant_id, correlation_id, source_service)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, operation, "dev fallback producing synthetic response");
                Self::synthetic_response(operation)
            }
        }
    }

    /// A deterministic stand-in response derived from the operation name,
    /// documented as a test-only fallback and never a contract.
    pub fn synthetic_response(operation: &str) -> serde_json::Value {
        serde_json::json!({
            "status": "success",
            "synthetic": true,
            "operation": operation,
            "message": format!("dev fallback response for '{operation}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::router::RouterConfig;

    #[tokio::test]
    async fn falls_back_to_synthetic_response_when_router_errors() {
        let backend = InMemoryBackend::new();
        let router = Router::new(backend, RouterConfig::default(), None);
        let fallback = DevFallbackRouter::new(router);
        let response = fallback.route_message(Role::Si, "get_status", serde_json::json!({}), 0, None, None, "gateway").await;
        assert_eq!(response["synthetic"], true);
    }
}
