//! The `QueuedMessage` data model and per-queue-type ordering (§4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    Priority,
    Fifo,
    Lifo,
    Delayed,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retry,
    DeadLetter,
    Expired,
}

/// A message tracked by a [`crate::queue::MessageQueue`]. Mirrors
/// `RoutedMessage` plus queue bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    pub consumer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub correlation_id: Option<String>,
    pub tenant_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl QueuedMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue_name: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        scheduled_time: DateTime<Utc>,
        expiry_time: Option<DateTime<Utc>>,
        correlation_id: Option<String>,
        tenant_id: Option<String>,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            queue_name: queue_name.into(),
            payload,
            priority,
            scheduled_time,
            expiry_time,
            status: MessageStatus::Queued,
            consumer_id: None,
            created_at: Utc::now(),
            processing_at: None,
            retry_count: 0,
            max_retries,
            correlation_id,
            tenant_id,
            tags,
            metadata,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time.map(|t| t <= now).unwrap_or(false)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time <= now
    }
}

/// Ordering key for the PRIORITY backing structure: `(priority desc,
/// scheduled_time asc)` pop order. `BinaryHeap` is a max-heap so the
/// `Ord` impl below must make the message that should pop first compare
/// as greatest.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PriorityKey {
    pub id: String,
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.scheduled_time.cmp(&self.scheduled_time))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exponential-backoff schedule lookup: `retry_delays[min(retry_count-1,
/// len-1)]`, in seconds.
pub fn backoff_delay_seconds(retry_delays: &[u64], retry_count: u32) -> u64 {
    if retry_delays.is_empty() || retry_count == 0 {
        return 0;
    }
    let idx = (retry_count as usize - 1).min(retry_delays.len() - 1);
    retry_delays[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn priority_key_orders_highest_priority_first() {
        let mut heap = BinaryHeap::new();
        let now = Utc::now();
        heap.push(PriorityKey { id: "low".into(), priority: 1, scheduled_time: now });
        heap.push(PriorityKey { id: "high".into(), priority: 9, scheduled_time: now });
        heap.push(PriorityKey { id: "mid".into(), priority: 5, scheduled_time: now });
        assert_eq!(heap.pop().unwrap().id, "high");
        assert_eq!(heap.pop().unwrap().id, "mid");
        assert_eq!(heap.pop().unwrap().id, "low");
    }

    #[test]
    fn priority_key_tiebreaks_on_earliest_scheduled_time() {
        let mut heap = BinaryHeap::new();
        let now = Utc::now();
        heap.push(PriorityKey { id: "later".into(), priority: 5, scheduled_time: now + chrono::Duration::seconds(10) });
        heap.push(PriorityKey { id: "earlier".into(), priority: 5, scheduled_time: now });
        assert_eq!(heap.pop().unwrap().id, "earlier");
    }

    #[test]
    fn backoff_delay_clamps_to_last_entry() {
        let delays = [1, 5, 15, 60];
        assert_eq!(backoff_delay_seconds(&delays, 1), 1);
        assert_eq!(backoff_delay_seconds(&delays, 4), 60);
        assert_eq!(backoff_delay_seconds(&delays, 100), 60);
    }
}
