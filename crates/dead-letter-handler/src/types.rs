//! The `DeadLetterMessage`/`FailureContext` data model (§3, §4.9).

use chrono::{DateTime, Utc};
use mr_queue_manager::QueuedMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ProcessingError,
    Timeout,
    InvalidFormat,
    ConsumerUnavailable,
    RetryExhausted,
    PoisonMessage,
    ResourceUnavailable,
    PermissionDenied,
    DependencyFailure,
    CircuitBreakerOpen,
}

impl FailureReason {
    /// Base priority-score contribution by reason, per §4.9.
    pub fn base_score(self) -> f64 {
        match self {
            FailureReason::CircuitBreakerOpen => 0.9,
            FailureReason::DependencyFailure => 0.8,
            FailureReason::ResourceUnavailable => 0.7,
            FailureReason::Timeout => 0.6,
            FailureReason::ConsumerUnavailable => 0.5,
            FailureReason::RetryExhausted => 0.4,
            FailureReason::ProcessingError => 0.3,
            FailureReason::PermissionDenied => 0.2,
            FailureReason::InvalidFormat => 0.1,
            FailureReason::PoisonMessage => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    pub failure_id: String,
    pub reason: FailureReason,
    pub error_message: String,
    pub source_service: String,
    pub source_queue: String,
    pub failure_time: DateTime<Utc>,
    pub retry_count: u32,
    pub stack_trace: Option<String>,
}

impl FailureContext {
    pub fn new(
        reason: FailureReason,
        error_message: impl Into<String>,
        source_service: impl Into<String>,
        source_queue: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            failure_id: Uuid::new_v4().to_string(),
            reason,
            error_message: error_message.into(),
            source_service: source_service.into(),
            source_queue: source_queue.into(),
            failure_time: Utc::now(),
            retry_count,
            stack_trace: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    RouteAlternative,
    TransformRetry,
    ManualIntervention,
    Discard,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlanStep {
    pub action: RecoveryAction,
    pub confidence: f64,
    pub estimated_success_rate: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub transient: bool,
    pub suggested_action: RecoveryAction,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: String,
    pub original: QueuedMessage,
    pub failure: FailureContext,
    pub recovery_attempt_count: u32,
    pub priority_score: f64,
    pub is_poison: bool,
    pub analysis: Vec<AnalysisResult>,
    pub recovery_plan: Vec<RecoveryPlanStep>,
    pub tags: Vec<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterMessage {
    pub fn new(original: QueuedMessage, failure: FailureContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            original,
            failure,
            recovery_attempt_count: 0,
            priority_score: 0.0,
            is_poison: false,
            analysis: Vec::new(),
            recovery_plan: Vec::new(),
            tags: Vec::new(),
            archived: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub reason: Option<FailureReason>,
    pub source_service: Option<String>,
    pub is_poison: Option<bool>,
    pub min_priority_score: Option<f64>,
}

impl DeadLetterFilter {
    pub fn matches(&self, msg: &DeadLetterMessage) -> bool {
        if let Some(reason) = self.reason {
            if msg.failure.reason != reason {
                return false;
            }
        }
        if let Some(ref service) = self.source_service {
            if &msg.failure.source_service != service {
                return false;
            }
        }
        if let Some(poison) = self.is_poison {
            if msg.is_poison != poison {
                return false;
            }
        }
        if let Some(min) = self.min_priority_score {
            if msg.priority_score < min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub total: usize,
    pub poison_count: usize,
    pub archived_count: usize,
    pub by_reason: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    pub poison_threshold: u32,
    pub recurrence_threshold: usize,
    pub max_recovery_attempts: u32,
    pub auto_recovery_confidence_threshold: f64,
    pub storage_root: String,
    pub retention_days: i64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            poison_threshold: 5,
            recurrence_threshold: 3,
            max_recovery_attempts: 3,
            auto_recovery_confidence_threshold: 0.8,
            storage_root: "./dead_letters".to_string(),
            retention_days: 30,
        }
    }
}
