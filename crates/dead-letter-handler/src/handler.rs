//! [`DeadLetterHandler`]: the orchestrator tying together poison detection,
//! priority scoring, pattern tracking, and recovery-plan generation into
//! the public operations of §4.9 (`handleFailedMessage`, `recoverMessage`,
//! `replayMessage`, `discardMessage`, `listDeadLetters`, `getStats`).

use crate::poison::{is_poison, RecurrenceRegistry};
use crate::priority::{priority_score, PatternTracker};
use crate::recovery::{analyze, apply_action, build_recovery_plan, RecoveryOutcome};
use crate::types::{
    DeadLetterConfig, DeadLetterFilter, DeadLetterMessage, DeadLetterStats, FailureContext,
    FailureReason, RecoveryAction,
};
use chrono::Utc;
use dashmap::DashMap;
use mr_event_bus::{EventBus, EventPriority, EventScope};
use mr_queue_manager::{MessageQueue, QueuedMessage};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead letter '{0}' not found")]
    NotFound(String),
    #[error("dead letter '{0}' already archived")]
    AlreadyArchived(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeadLetterError>;

/// Consumes failed messages, classifies them, and produces/attempts
/// recovery plans. One handler instance serves the whole process; queues
/// and the router hand it failures rather than it polling for them.
pub struct DeadLetterHandler {
    config: DeadLetterConfig,
    event_bus: Option<Arc<EventBus>>,
    registry: DashMap<String, DeadLetterMessage>,
    recurrence: Arc<RecurrenceRegistry>,
    patterns: Arc<PatternTracker>,
}

impl DeadLetterHandler {
    pub fn new(config: DeadLetterConfig, event_bus: Option<Arc<EventBus>>) -> Arc<Self> {
        let handler = Arc::new(Self {
            config,
            event_bus,
            registry: DashMap::new(),
            recurrence: Arc::new(RecurrenceRegistry::new()),
            patterns: Arc::new(PatternTracker::new()),
        });
        let cleanup = handler.clone();
        tokio::spawn(async move { cleanup.cleanup_loop().await });
        handler
    }

    fn emit(&self, event_type: &str, payload: serde_json::Value) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event_type.to_string(), payload, "dead-letter-handler", EventScope::Global, EventPriority::High);
        }
    }

    /// Classifies a failed message, scores it, tracks its `(reason,
    /// source_service)` pattern, builds a recovery plan, and — if the plan's
    /// top step clears the confidence bar — attempts it immediately.
    pub async fn handle_failed_message(&self, original: QueuedMessage, failure: FailureContext) -> DeadLetterMessage {
        let recurrence_key = failure.error_message.clone() + &original.correlation_id.clone().unwrap_or_default();
        let is_poison = is_poison(&failure, &original.payload, &recurrence_key, &self.recurrence, &self.config);

        let mut dead_letter = DeadLetterMessage::new(original.clone(), failure.clone());
        dead_letter.is_poison = is_poison;
        dead_letter.priority_score = priority_score(&failure, &original, is_poison);
        self.patterns.record(failure.reason, &failure.source_service, &dead_letter.id);

        let analysis = vec![analyze(&dead_letter)];
        dead_letter.recovery_plan = build_recovery_plan(&dead_letter, &analysis);
        dead_letter.analysis = analysis;

        self.emit(
            "dead_letter.message.received",
            serde_json::json!({
                "dead_letter_id": dead_letter.id,
                "original_message_id": original.id,
                "failure_reason": format!("{:?}", failure.reason),
                "is_poison": is_poison,
                "priority_score": dead_letter.priority_score,
            }),
        );

        self.registry.insert(dead_letter.id.clone(), dead_letter.clone());

        if !is_poison && dead_letter.recovery_attempt_count < self.config.max_recovery_attempts {
            if let Some(step) = dead_letter.recovery_plan.first() {
                if step.confidence > self.config.auto_recovery_confidence_threshold {
                    let action = step.action;
                    if let Ok(updated) = self.recover_message(&dead_letter.id, action).await {
                        return updated;
                    }
                }
            }
        }

        dead_letter
    }

    /// Applies a recovery action. RETRY/ROUTE_ALTERNATIVE/TRANSFORM_RETRY
    /// return the message eligible to be re-enqueued by the caller via
    /// [`Self::replay_message`]; MANUAL_INTERVENTION raises an alert event;
    /// DISCARD/ARCHIVE are terminal.
    pub async fn recover_message(&self, dead_letter_id: &str, action: RecoveryAction) -> Result<DeadLetterMessage> {
        let mut entry = self
            .registry
            .get_mut(dead_letter_id)
            .ok_or_else(|| DeadLetterError::NotFound(dead_letter_id.to_string()))?;
        entry.recovery_attempt_count += 1;

        match apply_action(action, &entry) {
            RecoveryOutcome::Retryable(message) => {
                entry.original = message;
                self.emit(
                    "dead_letter.recovery.attempted",
                    serde_json::json!({"dead_letter_id": dead_letter_id, "action": format!("{action:?}")}),
                );
            }
            RecoveryOutcome::RequiresHuman => {
                self.emit(
                    "dead_letter.alert.manual_intervention",
                    serde_json::json!({"dead_letter_id": dead_letter_id, "reason": entry.failure.error_message.clone()}),
                );
            }
            RecoveryOutcome::Terminal => {
                entry.tags.push("terminal".to_string());
            }
        }
        Ok(entry.clone())
    }

    /// Re-enqueues a recovered dead letter's payload onto `target_queue`.
    pub async fn replay_message(&self, dead_letter_id: &str, target_queue: &Arc<MessageQueue>) -> Result<String> {
        let entry = self
            .registry
            .get(dead_letter_id)
            .ok_or_else(|| DeadLetterError::NotFound(dead_letter_id.to_string()))?;
        let original = entry.original.clone();
        drop(entry);

        let new_id = target_queue.enqueue(
            original.payload,
            original.priority,
            Some(Utc::now()),
            original.expiry_time,
            original.correlation_id,
            original.tenant_id,
            original.tags,
            original.metadata,
        );
        self.emit(
            "dead_letter.message.replay",
            serde_json::json!({"dead_letter_id": dead_letter_id, "replayed_message_id": new_id}),
        );
        Ok(new_id)
    }

    pub fn discard_message(&self, dead_letter_id: &str, reason: &str) -> Result<()> {
        let mut entry = self
            .registry
            .get_mut(dead_letter_id)
            .ok_or_else(|| DeadLetterError::NotFound(dead_letter_id.to_string()))?;
        entry.tags.push(format!("discarded:{reason}"));
        let dead_letter_id = dead_letter_id.to_string();
        drop(entry);
        self.emit("dead_letter.message.discarded", serde_json::json!({"dead_letter_id": dead_letter_id, "reason": reason}));
        Ok(())
    }

    pub fn list_dead_letters(&self, filter: &DeadLetterFilter, limit: usize) -> Vec<DeadLetterMessage> {
        let mut matches: Vec<DeadLetterMessage> = self
            .registry
            .iter()
            .map(|e| e.value().clone())
            .filter(|msg| filter.matches(msg))
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(limit);
        matches
    }

    pub fn get_stats(&self) -> DeadLetterStats {
        let mut stats = DeadLetterStats::default();
        for entry in self.registry.iter() {
            let msg = entry.value();
            stats.total += 1;
            if msg.is_poison {
                stats.poison_count += 1;
            }
            if msg.archived {
                stats.archived_count += 1;
            }
            *stats.by_reason.entry(format!("{:?}", msg.failure.reason)).or_insert(0) += 1;
        }
        stats
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        PathBuf::from(&self.config.storage_root).join("archived").join(format!("{id}.json"))
    }

    fn archive(&self, dead_letter: &DeadLetterMessage) -> Result<()> {
        let path = self.archive_path(&dead_letter.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(dead_letter)?)?;
        Ok(())
    }

    /// Runs roughly daily: archives and removes entries older than
    /// `retention_days`, archiving before deletion from the live registry.
    async fn cleanup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
            let expired: Vec<String> = self
                .registry
                .iter()
                .filter(|e| e.value().created_at < cutoff)
                .map(|e| e.key().clone())
                .collect();
            for id in expired {
                if let Some((_, mut msg)) = self.registry.remove(&id) {
                    msg.archived = true;
                    if let Err(err) = self.archive(&msg) {
                        error!(dead_letter_id = %id, error = %err, "failed to archive expired dead letter");
                        continue;
                    }
                    info!(dead_letter_id = %id, "archived and reaped expired dead letter");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn message() -> QueuedMessage {
        QueuedMessage::new("q", serde_json::json!({"a": 1}), 0, Utc::now(), None, None, None, vec![], HashMap::new(), 3)
    }

    #[tokio::test]
    async fn handle_failed_message_attempts_high_confidence_retry_plan() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default(), None);
        let failure = FailureContext::new(FailureReason::Timeout, "request timed out", "svc", "q", 1);
        let dead_letter = handler.handle_failed_message(message(), failure).await;
        assert_eq!(dead_letter.recovery_attempt_count, 1);
        assert!(!dead_letter.is_poison);
    }

    #[tokio::test]
    async fn poison_message_is_discarded_not_retried() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default(), None);
        let failure = FailureContext::new(FailureReason::InvalidFormat, "failed to parse json schema", "svc", "q", 6);
        let dead_letter = handler.handle_failed_message(message(), failure).await;
        assert!(dead_letter.is_poison);
        assert_eq!(dead_letter.recovery_plan[0].action, RecoveryAction::Discard);
    }

    #[tokio::test]
    async fn list_dead_letters_filters_by_poison_flag() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default(), None);
        handler
            .handle_failed_message(message(), FailureContext::new(FailureReason::Timeout, "timeout", "svc", "q", 1))
            .await;
        handler
            .handle_failed_message(
                message(),
                FailureContext::new(FailureReason::InvalidFormat, "bad json schema", "svc", "q", 6),
            )
            .await;
        let filter = DeadLetterFilter { is_poison: Some(true), ..Default::default() };
        let poisoned = handler.list_dead_letters(&filter, 10);
        assert_eq!(poisoned.len(), 1);
    }

    #[tokio::test]
    async fn get_stats_counts_by_reason() {
        let handler = DeadLetterHandler::new(DeadLetterConfig::default(), None);
        handler
            .handle_failed_message(message(), FailureContext::new(FailureReason::Timeout, "timeout", "svc", "q", 1))
            .await;
        let stats = handler.get_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_reason.get("timeout"), Some(&1));
    }
}
