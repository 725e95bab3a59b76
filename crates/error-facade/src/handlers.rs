//! Built-in per-error-type handlers (§4.10): a token-refresh hint on auth
//! expiry, a per-service failure counter that opens the named circuit
//! breaker after `failure_threshold` hits, a retry recovery-plan event for
//! network/timeout errors, rollback hints for database constraint
//! violations, and an escalation event for critical system errors.

use crate::types::{ErrorRecord, ErrorSeverity, ErrorType, ServiceFailureCounter};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mr_event_bus::{EventBus, EventPriority, EventScope};
use std::sync::Arc;

/// A handler registered against one [`ErrorType`]; the facade invokes every
/// handler registered for the incoming record's type.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, record: &ErrorRecord);
}

fn emit(bus: &Arc<EventBus>, event_type: &str, payload: serde_json::Value) {
    bus.emit(event_type.to_string(), payload, "error-facade", EventScope::Global, EventPriority::High);
}

/// Emits `auth.token_refresh_required` when the message mentions an
/// expired token.
pub struct AuthenticationHandler {
    bus: Arc<EventBus>,
}

impl AuthenticationHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ErrorHandler for AuthenticationHandler {
    async fn handle(&self, record: &ErrorRecord) {
        let lower = record.error_message.to_lowercase();
        if lower.contains("token") && lower.contains("expired") {
            emit(
                &self.bus,
                "auth.token_refresh_required",
                serde_json::json!({"error_id": record.error_id, "user_id": record.context.user_id}),
            );
        }
    }
}

/// Tracks a failure counter per service; once it reaches `failure_threshold`
/// emits `circuit_breaker.opened` for that service name.
pub struct IntegrationHandler {
    bus: Arc<EventBus>,
    failure_threshold: u64,
    counters: DashMap<String, ServiceFailureCounter>,
}

impl IntegrationHandler {
    pub fn new(bus: Arc<EventBus>, failure_threshold: u64) -> Self {
        Self { bus, failure_threshold, counters: DashMap::new() }
    }
}

#[async_trait]
impl ErrorHandler for IntegrationHandler {
    async fn handle(&self, record: &ErrorRecord) {
        let mut counter = self.counters.entry(record.context.service_name.clone()).or_default();
        counter.failure_count += 1;
        counter.last_failure = Some(Utc::now());
        if counter.failure_count >= self.failure_threshold {
            emit(
                &self.bus,
                "circuit_breaker.opened",
                serde_json::json!({"service_name": record.context.service_name, "error_id": record.error_id}),
            );
        }
    }
}

/// Network/timeout errors are usually transient: emits
/// `error.recovery_plan_created` with a RETRY action and a backoff delay
/// that grows with the record's retry count.
pub struct NetworkTimeoutHandler {
    bus: Arc<EventBus>,
    max_retry_attempts: u32,
}

impl NetworkTimeoutHandler {
    pub fn new(bus: Arc<EventBus>, max_retry_attempts: u32) -> Self {
        Self { bus, max_retry_attempts }
    }
}

#[async_trait]
impl ErrorHandler for NetworkTimeoutHandler {
    async fn handle(&self, record: &ErrorRecord) {
        if record.retry_count >= self.max_retry_attempts {
            return;
        }
        let delay_seconds = (30 * (record.retry_count + 1)).min(300);
        emit(
            &self.bus,
            "error.recovery_plan_created",
            serde_json::json!({
                "error_id": record.error_id,
                "actions": ["retry"],
                "retry_delay_seconds": delay_seconds,
            }),
        );
    }
}

/// Database errors: constraint violations need data correction, not a
/// retry; timeouts get a retry recovery-plan hint instead.
pub struct DatabaseHandler {
    bus: Arc<EventBus>,
}

impl DatabaseHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ErrorHandler for DatabaseHandler {
    async fn handle(&self, record: &ErrorRecord) {
        let lower = record.error_message.to_lowercase();
        if lower.contains("constraint") {
            emit(
                &self.bus,
                "error.constraint_violation",
                serde_json::json!({"error_id": record.error_id, "operation": record.context.operation_name}),
            );
        } else if lower.contains("timeout") {
            emit(
                &self.bus,
                "error.recovery_plan_created",
                serde_json::json!({"error_id": record.error_id, "actions": ["retry"], "optimize_query": true}),
            );
        }
    }
}

/// System errors at HIGH/CRITICAL severity are escalated immediately.
pub struct SystemHandler {
    bus: Arc<EventBus>,
}

impl SystemHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ErrorHandler for SystemHandler {
    async fn handle(&self, record: &ErrorRecord) {
        if record.severity >= ErrorSeverity::High {
            emit(
                &self.bus,
                "error.escalation_required",
                serde_json::json!({
                    "error_id": record.error_id,
                    "severity": format!("{:?}", record.severity),
                    "service_name": record.context.service_name,
                }),
            );
        }
    }
}

/// Builds the default handler set keyed by [`ErrorType`], mirroring the
/// source's `_initialize_default_handlers`.
pub fn default_handlers(
    bus: Arc<EventBus>,
    integration_failure_threshold: u64,
    max_retry_attempts: u32,
) -> Vec<(ErrorType, Arc<dyn ErrorHandler>)> {
    vec![
        (ErrorType::Authentication, Arc::new(AuthenticationHandler::new(bus.clone())) as Arc<dyn ErrorHandler>),
        (ErrorType::Integration, Arc::new(IntegrationHandler::new(bus.clone(), integration_failure_threshold))),
        (ErrorType::Network, Arc::new(NetworkTimeoutHandler::new(bus.clone(), max_retry_attempts))),
        (ErrorType::Timeout, Arc::new(NetworkTimeoutHandler::new(bus.clone(), max_retry_attempts))),
        (ErrorType::Database, Arc::new(DatabaseHandler::new(bus.clone()))),
        (ErrorType::System, Arc::new(SystemHandler::new(bus))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorContext;
    use mr_event_bus::{EventBus, EventBusConfig};

    fn record(error_type: ErrorType, message: &str, severity: ErrorSeverity) -> ErrorRecord {
        ErrorRecord {
            error_id: "e1".to_string(),
            error_type,
            error_class: "TestError".to_string(),
            severity,
            context: ErrorContext::new("op", "svc", "si"),
            error_message: message.to_string(),
            occurred_at: Utc::now(),
            fingerprint: "abc123".to_string(),
            correlation_id: "corr-1".to_string(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn integration_handler_opens_breaker_after_threshold() {
        let bus = EventBus::new(EventBusConfig::default());
        let handler = IntegrationHandler::new(bus, 2);
        let rec = record(ErrorType::Integration, "downstream unavailable", ErrorSeverity::Medium);
        handler.handle(&rec).await;
        assert_eq!(handler.counters.get("svc").unwrap().failure_count, 1);
        handler.handle(&rec).await;
        assert_eq!(handler.counters.get("svc").unwrap().failure_count, 2);
    }

    #[tokio::test]
    async fn network_handler_skips_after_max_attempts() {
        let bus = EventBus::new(EventBusConfig::default());
        let handler = NetworkTimeoutHandler::new(bus, 3);
        let mut rec = record(ErrorType::Network, "connection reset", ErrorSeverity::Low);
        rec.retry_count = 5;
        handler.handle(&rec).await;
    }
}
