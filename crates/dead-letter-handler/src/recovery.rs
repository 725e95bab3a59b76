//! Per-reason analyzers, recovery-plan generation, and the recovery-action
//! handlers themselves (§4.9).

use crate::types::{AnalysisResult, DeadLetterMessage, FailureReason, RecoveryAction, RecoveryPlanStep};
use mr_queue_manager::QueuedMessage;

/// Classifies the failure as transient or permanent and proposes a next
/// action, mirroring the per-reason analyzer catalogue.
pub fn analyze(dead_letter: &DeadLetterMessage) -> AnalysisResult {
    use FailureReason::*;
    let (transient, suggested_action, notes) = match dead_letter.failure.reason {
        Timeout | ResourceUnavailable | ConsumerUnavailable => {
            (true, RecoveryAction::Retry, "failure reason is typically transient".to_string())
        }
        CircuitBreakerOpen | DependencyFailure => {
            (true, RecoveryAction::RouteAlternative, "downstream dependency appears unavailable".to_string())
        }
        InvalidFormat => (false, RecoveryAction::TransformRetry, "payload likely needs repair before retry".to_string()),
        RetryExhausted => (false, RecoveryAction::ManualIntervention, "retries already exhausted upstream".to_string()),
        PermissionDenied => (false, RecoveryAction::ManualIntervention, "authorization issue requires operator action".to_string()),
        PoisonMessage => (false, RecoveryAction::Discard, "message flagged as poison".to_string()),
        ProcessingError => (true, RecoveryAction::Retry, "processing error without a more specific signal".to_string()),
    };
    AnalysisResult { transient, suggested_action, notes }
}

/// Builds an ordered recovery plan. A poison message's plan is always a
/// single DISCARD step regardless of the per-reason analysis.
pub fn build_recovery_plan(dead_letter: &DeadLetterMessage, analysis: &[AnalysisResult]) -> Vec<RecoveryPlanStep> {
    if dead_letter.is_poison {
        return vec![RecoveryPlanStep {
            action: RecoveryAction::Discard,
            confidence: 0.95,
            estimated_success_rate: 1.0,
            rationale: "poison message, no recovery attempted".to_string(),
        }];
    }

    let mut plan = Vec::new();
    for result in analysis {
        let (confidence, success_rate) = match result.suggested_action {
            RecoveryAction::Retry if result.transient => (0.85, 0.7),
            RecoveryAction::RouteAlternative => (0.75, 0.6),
            RecoveryAction::TransformRetry => (0.6, 0.5),
            RecoveryAction::ManualIntervention => (0.3, 0.3),
            RecoveryAction::Discard | RecoveryAction::Archive => (0.9, 1.0),
            _ => (0.4, 0.4),
        };
        plan.push(RecoveryPlanStep {
            action: result.suggested_action,
            confidence,
            estimated_success_rate: success_rate,
            rationale: result.notes.clone(),
        });
    }
    if dead_letter.recovery_attempt_count >= 2 && !plan.iter().any(|s| s.action == RecoveryAction::ManualIntervention) {
        plan.push(RecoveryPlanStep {
            action: RecoveryAction::ManualIntervention,
            confidence: 0.5,
            estimated_success_rate: 0.4,
            rationale: "repeated recovery attempts have not succeeded".to_string(),
        });
    }
    plan
}

/// Best-effort payload repair: JSON-decodes stringified fields and drops
/// null entries, used by the TRANSFORM_RETRY handler.
pub fn repair_payload(payload: &serde_json::Value) -> serde_json::Value {
    match payload {
        serde_json::Value::Object(map) => {
            let mut repaired = serde_json::Map::new();
            for (key, value) in map {
                if value.is_null() {
                    continue;
                }
                let value = match value {
                    serde_json::Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
                    other => repair_payload(other),
                };
                repaired.insert(key.clone(), value);
            }
            serde_json::Value::Object(repaired)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().filter(|v| !v.is_null()).map(repair_payload).collect())
        }
        other => other.clone(),
    }
}

/// Result of attempting a single recovery action, used by the handler to
/// decide the dead letter's next state.
pub enum RecoveryOutcome {
    Retryable(QueuedMessage),
    RequiresHuman,
    Terminal,
}

pub fn apply_action(action: RecoveryAction, dead_letter: &DeadLetterMessage) -> RecoveryOutcome {
    match action {
        RecoveryAction::Retry => {
            let mut message = dead_letter.original.clone();
            message.retry_count = 0;
            message.status = mr_queue_manager::MessageStatus::Queued;
            RecoveryOutcome::Retryable(message)
        }
        RecoveryAction::RouteAlternative => {
            let mut message = dead_letter.original.clone();
            message.retry_count = 0;
            message.status = mr_queue_manager::MessageStatus::Queued;
            message.tags.push("route_alternative".to_string());
            RecoveryOutcome::Retryable(message)
        }
        RecoveryAction::TransformRetry => {
            let mut message = dead_letter.original.clone();
            message.payload = repair_payload(&message.payload);
            message.retry_count = 0;
            message.status = mr_queue_manager::MessageStatus::Queued;
            RecoveryOutcome::Retryable(message)
        }
        RecoveryAction::ManualIntervention => RecoveryOutcome::RequiresHuman,
        RecoveryAction::Discard | RecoveryAction::Archive => RecoveryOutcome::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureContext;
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample_dead_letter(reason: FailureReason, poison: bool) -> DeadLetterMessage {
        let message = QueuedMessage::new("q", serde_json::json!({}), 0, Utc::now(), None, None, None, vec![], HashMap::new(), 3);
        let failure = FailureContext::new(reason, "boom", "svc", "q", 1);
        let mut dl = DeadLetterMessage::new(message, failure);
        dl.is_poison = poison;
        dl
    }

    #[test]
    fn poison_message_plan_is_discard_only() {
        let dl = sample_dead_letter(FailureReason::PoisonMessage, true);
        let plan = build_recovery_plan(&dl, &[]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, RecoveryAction::Discard);
    }

    #[test]
    fn transient_timeout_suggests_retry_with_high_confidence() {
        let dl = sample_dead_letter(FailureReason::Timeout, false);
        let analysis = vec![analyze(&dl)];
        let plan = build_recovery_plan(&dl, &analysis);
        assert_eq!(plan[0].action, RecoveryAction::Retry);
        assert!(plan[0].confidence > 0.8);
    }

    #[test]
    fn repair_payload_decodes_stringified_json_and_drops_nulls() {
        let payload = serde_json::json!({ "inner": "{\"n\": 1}", "gone": null, "keep": "plain" });
        let repaired = repair_payload(&payload);
        assert_eq!(repaired["inner"]["n"], 1);
        assert!(repaired.get("gone").is_none());
        assert_eq!(repaired["keep"], "plain");
    }
}
