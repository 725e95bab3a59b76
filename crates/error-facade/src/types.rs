//! The `ErrorRecord`/`ErrorPattern` data model (§4.10, §7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Error taxonomy recognised by the core. Semantic, not tied to any one
/// exception hierarchy — callers classify their own failures into one of
/// these before reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    Authentication,
    Authorization,
    BusinessLogic,
    Integration,
    Network,
    Database,
    ExternalApi,
    System,
    Configuration,
    Timeout,
    Resource,
    Concurrency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Caller-supplied context for a reported error: who was doing what, as
/// what role, for which tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation_name: String,
    pub service_name: String,
    pub role: String,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(operation_name: impl Into<String>, service_name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            service_name: service_name.into(),
            role: role.into(),
            tenant_id: None,
            correlation_id: None,
            user_id: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: String,
    pub error_type: ErrorType,
    pub error_class: String,
    pub severity: ErrorSeverity,
    pub context: ErrorContext,
    pub error_message: String,
    pub occurred_at: DateTime<Utc>,
    pub fingerprint: String,
    pub correlation_id: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub fingerprint: String,
    pub error_type: ErrorType,
    pub frequency: u64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub affected_operations: Vec<String>,
    pub affected_services: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub escalation_threshold: u64,
}

impl ErrorPattern {
    pub fn new(record: &ErrorRecord, suggested_actions: Vec<String>, escalation_threshold: u64) -> Self {
        Self {
            fingerprint: record.fingerprint.clone(),
            error_type: record.error_type,
            frequency: 1,
            first_occurrence: record.occurred_at,
            last_occurrence: record.occurred_at,
            affected_operations: vec![record.context.operation_name.clone()],
            affected_services: vec![record.context.service_name.clone()],
            suggested_actions,
            escalation_threshold,
        }
    }

    pub fn record_recurrence(&mut self, record: &ErrorRecord) {
        self.frequency += 1;
        self.last_occurrence = record.occurred_at;
        if !self.affected_operations.contains(&record.context.operation_name) {
            self.affected_operations.push(record.context.operation_name.clone());
        }
        if !self.affected_services.contains(&record.context.service_name) {
            self.affected_services.push(record.context.service_name.clone());
        }
    }

    pub fn exceeds_escalation_threshold(&self) -> bool {
        self.frequency >= self.escalation_threshold
    }
}

/// Per-service integration-failure counter feeding the built-in
/// `handle_integration_error` circuit-breaker hint (§4.10).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFailureCounter {
    pub failure_count: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

pub fn new_error_id() -> String {
    Uuid::new_v4().to_string()
}
