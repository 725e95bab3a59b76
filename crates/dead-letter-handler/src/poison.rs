//! Poison-message detectors (§4.9). A message is poison if any registered
//! detector triggers.

use crate::types::{DeadLetterConfig, FailureContext, FailureReason};
use dashmap::DashMap;
use std::sync::Arc;

const FORMAT_ERROR_KEYWORDS: [&str; 6] = ["json", "parse", "decode", "format", "schema", "validation"];
const MAX_PAYLOAD_BYTES: usize = 1_000_000;
const MAX_NESTING_DEPTH: usize = 20;

/// Tracks recent occurrences of `(message_id, correlation_id)` to detect
/// messages that keep resurfacing as dead letters.
#[derive(Default)]
pub struct RecurrenceRegistry {
    counts: DashMap<String, usize>,
}

impl RecurrenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_and_count(&self, key: &str) -> usize {
        let mut entry = self.counts.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

pub fn retry_count_detector(failure: &FailureContext, config: &DeadLetterConfig) -> bool {
    failure.retry_count >= config.poison_threshold
}

pub fn recurrence_detector(registry: &Arc<RecurrenceRegistry>, key: &str, config: &DeadLetterConfig) -> bool {
    registry.record_and_count(key) >= config.recurrence_threshold
}

pub fn format_error_detector(failure: &FailureContext) -> bool {
    if failure.reason == FailureReason::InvalidFormat {
        return true;
    }
    let lower = failure.error_message.to_lowercase();
    FORMAT_ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub fn oversized_payload_detector(payload: &serde_json::Value) -> bool {
    let serialized_len = serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0);
    serialized_len > MAX_PAYLOAD_BYTES || json_depth(payload) > MAX_NESTING_DEPTH
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Runs every built-in detector and returns `true` if any of them trigger.
pub fn is_poison(
    failure: &FailureContext,
    payload: &serde_json::Value,
    recurrence_key: &str,
    registry: &Arc<RecurrenceRegistry>,
    config: &DeadLetterConfig,
) -> bool {
    retry_count_detector(failure, config)
        || recurrence_detector(registry, recurrence_key, config)
        || format_error_detector(failure)
        || oversized_payload_detector(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(reason: FailureReason, retry_count: u32, message: &str) -> FailureContext {
        FailureContext::new(reason, message, "svc", "queue", retry_count)
    }

    #[test]
    fn retry_count_at_threshold_is_poison() {
        let config = DeadLetterConfig::default();
        let failure = ctx(FailureReason::ProcessingError, 5, "boom");
        assert!(retry_count_detector(&failure, &config));
    }

    #[test]
    fn recurrence_beyond_threshold_is_poison() {
        let registry = Arc::new(RecurrenceRegistry::new());
        let config = DeadLetterConfig::default();
        assert!(!recurrence_detector(&registry, "msg-1", &config));
        assert!(!recurrence_detector(&registry, "msg-1", &config));
        assert!(recurrence_detector(&registry, "msg-1", &config));
    }

    #[test]
    fn format_keyword_in_message_is_poison() {
        let failure = ctx(FailureReason::ProcessingError, 0, "failed to parse payload schema");
        assert!(format_error_detector(&failure));
    }

    #[test]
    fn oversized_payload_is_poison() {
        let huge = serde_json::json!({ "data": "x".repeat(1_500_000) });
        assert!(oversized_payload_detector(&huge));
        let small = serde_json::json!({ "data": "fine" });
        assert!(!oversized_payload_detector(&small));
    }

    #[test]
    fn deeply_nested_payload_is_poison() {
        let mut value = serde_json::json!(1);
        for _ in 0..25 {
            value = serde_json::json!({ "nested": value });
        }
        assert!(oversized_payload_detector(&value));
    }
}
