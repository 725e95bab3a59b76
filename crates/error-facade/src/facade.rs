//! [`ErrorCoordinationFacade`] (§4.10): a thin correlation layer over the
//! event bus, the circuit breaker, and the dead-letter handler. It does not
//! implement escalation or incident tracking itself — it only emits the
//! events those out-of-scope collaborators consume.

use crate::fingerprint::compute_fingerprint;
use crate::handlers::{default_handlers, ErrorHandler};
use crate::types::{new_error_id, ErrorContext, ErrorPattern, ErrorRecord, ErrorSeverity, ErrorType};
use dashmap::DashMap;
use mr_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct ErrorFacadeConfig {
    pub integration_failure_threshold: u64,
    pub max_retry_attempts: u32,
}

impl Default for ErrorFacadeConfig {
    fn default() -> Self {
        Self { integration_failure_threshold: 5, max_retry_attempts: 3 }
    }
}

pub struct ErrorCoordinationFacade {
    event_bus: Arc<EventBus>,
    records: DashMap<String, ErrorRecord>,
    patterns: DashMap<String, ErrorPattern>,
    handlers: HashMap<ErrorType, Vec<Arc<dyn ErrorHandler>>>,
}

impl ErrorCoordinationFacade {
    pub fn new(event_bus: Arc<EventBus>, config: ErrorFacadeConfig) -> Arc<Self> {
        let mut handlers: HashMap<ErrorType, Vec<Arc<dyn ErrorHandler>>> = HashMap::new();
        for (error_type, handler) in
            default_handlers(event_bus.clone(), config.integration_failure_threshold, config.max_retry_attempts)
        {
            handlers.entry(error_type).or_default().push(handler);
        }
        Arc::new(Self { event_bus, records: DashMap::new(), patterns: DashMap::new(), handlers })
    }

    /// Registers an additional handler for `error_type`, run alongside any
    /// built-ins already registered for it.
    pub fn register_handler(&mut self, error_type: ErrorType, handler: Arc<dyn ErrorHandler>) {
        self.handlers.entry(error_type).or_default().push(handler);
    }

    /// Records an occurrence, correlates it into its `ErrorPattern` by
    /// fingerprint, and invokes every handler registered for its type.
    pub async fn record_error(
        &self,
        error_type: ErrorType,
        error_class: &str,
        severity: ErrorSeverity,
        context: ErrorContext,
        error_message: &str,
        retry_count: u32,
    ) -> ErrorRecord {
        let fingerprint = compute_fingerprint(error_type, error_class, &context, error_message);
        let correlation_id = context.correlation_id.clone().unwrap_or_else(|| fingerprint.clone());

        let record = ErrorRecord {
            error_id: new_error_id(),
            error_type,
            error_class: error_class.to_string(),
            severity,
            context,
            error_message: error_message.to_string(),
            occurred_at: chrono::Utc::now(),
            fingerprint: fingerprint.clone(),
            correlation_id,
            retry_count,
        };

        self.update_pattern(&record);
        self.records.insert(record.error_id.clone(), record.clone());

        if let Some(handlers) = self.handlers.get(&error_type) {
            for handler in handlers {
                handler.handle(&record).await;
            }
        }

        info!(error_id = %record.error_id, fingerprint = %fingerprint, error_type = ?error_type, "error recorded");
        record
    }

    fn update_pattern(&self, record: &ErrorRecord) {
        self.patterns
            .entry(record.fingerprint.clone())
            .and_modify(|pattern| pattern.record_recurrence(record))
            .or_insert_with(|| ErrorPattern::new(record, suggested_actions(record.error_type), escalation_threshold(record.error_type)));

        if let Some(pattern) = self.patterns.get(&record.fingerprint) {
            if pattern.exceeds_escalation_threshold() {
                self.event_bus.emit(
                    "error.escalation_required".to_string(),
                    serde_json::json!({"fingerprint": record.fingerprint, "frequency": pattern.frequency}),
                    "error-facade",
                    mr_event_bus::EventScope::Global,
                    mr_event_bus::EventPriority::High,
                );
            }
        }
    }

    pub fn get_pattern(&self, fingerprint: &str) -> Option<ErrorPattern> {
        self.patterns.get(fingerprint).map(|p| p.clone())
    }

    pub fn patterns(&self) -> Vec<ErrorPattern> {
        self.patterns.iter().map(|e| e.value().clone()).collect()
    }

    pub fn record(&self, error_id: &str) -> Option<ErrorRecord> {
        self.records.get(error_id).map(|r| r.clone())
    }
}

/// Default suggested actions by error type, seeded the first time a
/// fingerprint is seen; a human or a future handler can refine these.
fn suggested_actions(error_type: ErrorType) -> Vec<String> {
    match error_type {
        ErrorType::Validation => vec!["review_input_schema".to_string()],
        ErrorType::Authentication => vec!["refresh_token".to_string()],
        ErrorType::Authorization => vec!["review_role_grants".to_string()],
        ErrorType::Integration | ErrorType::ExternalApi => vec!["check_circuit_breaker".to_string(), "retry".to_string()],
        ErrorType::Network | ErrorType::Timeout => vec!["retry_with_backoff".to_string()],
        ErrorType::Database => vec!["review_constraints".to_string()],
        ErrorType::System => vec!["escalate".to_string()],
        ErrorType::Configuration => vec!["review_deployment_config".to_string()],
        ErrorType::Resource => vec!["scale_up".to_string()],
        ErrorType::Concurrency => vec!["review_locking".to_string()],
        ErrorType::BusinessLogic => vec!["review_business_rule".to_string()],
    }
}

fn escalation_threshold(error_type: ErrorType) -> u64 {
    match error_type {
        ErrorType::System => 3,
        ErrorType::Database | ErrorType::Integration => 10,
        _ => 25,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mr_event_bus::{EventBus, EventBusConfig};

    #[tokio::test]
    async fn repeated_errors_with_dynamic_ids_share_one_pattern() {
        let bus = EventBus::new(EventBusConfig::default());
        let facade = ErrorCoordinationFacade::new(bus, ErrorFacadeConfig::default());
        let ctx = ErrorContext::new("sync_banking_transactions", "banking_integration", "si");
        facade
            .record_error(ErrorType::Integration, "ValueError", ErrorSeverity::Medium, ctx.clone(), "User 42 failed", 0)
            .await;
        let r2 = facade
            .record_error(ErrorType::Integration, "ValueError", ErrorSeverity::Medium, ctx, "User 99 failed", 0)
            .await;
        let pattern = facade.get_pattern(&r2.fingerprint).unwrap();
        assert_eq!(pattern.frequency, 2);
    }

    #[tokio::test]
    async fn critical_system_error_emits_escalation() {
        let bus = EventBus::new(EventBusConfig::default());
        let facade = ErrorCoordinationFacade::new(bus, ErrorFacadeConfig::default());
        let ctx = ErrorContext::new("op", "core-svc", "core");
        let record = facade
            .record_error(ErrorType::System, "PanicError", ErrorSeverity::Critical, ctx, "unexpected panic", 0)
            .await;
        assert!(facade.record(&record.error_id).is_some());
    }
}
