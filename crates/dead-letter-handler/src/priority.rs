//! Priority-score formula and `(failure_reason, source_service)` pattern
//! tracking (§4.9).

use crate::types::{FailureContext, FailureReason};
use dashmap::DashMap;
use mr_queue_manager::QueuedMessage;
use std::collections::VecDeque;

const PATTERN_HISTORY_CAP: usize = 100;

/// `base_by_reason + message_priority_boost + tenant_boost`, multiplied by
/// 0.1 if the message is flagged poison, clamped to `[0, 1]`.
pub fn priority_score(failure: &FailureContext, message: &QueuedMessage, is_poison: bool) -> f64 {
    let base = failure.reason.base_score();
    let priority_boost = (message.priority.clamp(0, 10) as f64 / 10.0) * 0.1;
    let tenant_boost = if message.tenant_id.is_some() { 0.05 } else { 0.0 };
    let mut score = (base + priority_boost + tenant_boost).clamp(0.0, 1.0);
    if is_poison {
        score *= 0.1;
    }
    score.clamp(0.0, 1.0)
}

/// Tracks the last [`PATTERN_HISTORY_CAP`] dead-letter ids observed for
/// each `(failure_reason, source_service)` pair.
#[derive(Default)]
pub struct PatternTracker {
    history: DashMap<(FailureReason, String), VecDeque<String>>,
}

impl PatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reason: FailureReason, source_service: &str, dead_letter_id: &str) {
        let mut entry = self.history.entry((reason, source_service.to_string())).or_default();
        entry.push_back(dead_letter_id.to_string());
        if entry.len() > PATTERN_HISTORY_CAP {
            entry.pop_front();
        }
    }

    pub fn occurrences(&self, reason: FailureReason, source_service: &str) -> usize {
        self.history.get(&(reason, source_service.to_string())).map(|ids| ids.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn message(priority: i32, tenant: Option<&str>) -> QueuedMessage {
        QueuedMessage::new(
            "q",
            serde_json::json!({}),
            priority,
            Utc::now(),
            None,
            None,
            tenant.map(|t| t.to_string()),
            vec![],
            HashMap::new(),
            3,
        )
    }

    #[test]
    fn circuit_breaker_reason_scores_near_top() {
        let failure = FailureContext::new(crate::types::FailureReason::CircuitBreakerOpen, "open", "svc", "q", 0);
        let score = priority_score(&failure, &message(0, None), false);
        assert!(score >= 0.9 && score <= 1.0);
    }

    #[test]
    fn poison_flag_crushes_score() {
        let failure = FailureContext::new(crate::types::FailureReason::InvalidFormat, "bad json", "svc", "q", 0);
        let score = priority_score(&failure, &message(0, None), true);
        assert!(score <= 0.1);
    }

    #[test]
    fn pattern_tracker_caps_history_at_100() {
        let tracker = PatternTracker::new();
        for i in 0..150 {
            tracker.record(crate::types::FailureReason::Timeout, "svc", &format!("id-{i}"));
        }
        assert_eq!(tracker.occurrences(crate::types::FailureReason::Timeout, "svc"), 100);
    }
}
