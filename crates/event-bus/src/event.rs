//! The `Event` data model (§3) shared by every subsystem that rides the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Audience tag for an event. `Global` matches any subscriber scope;
/// anything else must match the handler's scope exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Global,
    SiServices,
    AppServices,
    Hybrid,
    Tenant,
}

impl EventScope {
    pub fn compatible_with(&self, handler_scope: EventScope) -> bool {
        handler_scope == EventScope::Global || handler_scope == *self
    }
}

/// Delivery priority. Ord derives a total order so a `BinaryHeap` can use it
/// directly as the queue-selection key (`Critical` highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl EventPriority {
    pub const ALL: [EventPriority; 4] = [
        EventPriority::Critical,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

/// An immutable record carrying a hierarchical dotted type name (e.g.
/// `system.event.dead_letter`), an opaque payload, and routing metadata.
///
/// Invariant: `id` is unique for the process lifetime; `retry_count <=
/// max_retries` always holds once the event is constructed via
/// [`Event::new`] and only incremented through [`Event::with_incremented_retry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub scope: EventScope,
    pub priority: EventPriority,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
        scope: EventScope,
        priority: EventPriority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload,
            source: source.into(),
            scope,
            priority,
            created_at: Utc::now(),
            tenant_id: None,
            correlation_id: None,
            retry_count: 0,
            max_retries: 3,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_retry_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Returns a copy with `retry_count` incremented. Callers are expected
    /// to check [`Event::is_retry_exhausted`] before calling this again.
    pub fn with_incremented_retry(mut self) -> Self {
        self.retry_count += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_highest() {
        let mut priorities = vec![
            EventPriority::Low,
            EventPriority::Critical,
            EventPriority::Normal,
            EventPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                EventPriority::Low,
                EventPriority::Normal,
                EventPriority::High,
                EventPriority::Critical,
            ]
        );
    }

    #[test]
    fn scope_global_matches_everything() {
        assert!(EventScope::Tenant.compatible_with(EventScope::Global));
        assert!(EventScope::Tenant.compatible_with(EventScope::Tenant));
        assert!(!EventScope::Tenant.compatible_with(EventScope::Hybrid));
    }

    #[test]
    fn retry_exhaustion_tracks_max_retries() {
        let event = Event::new(
            "system.test",
            serde_json::json!({}),
            "test",
            EventScope::Global,
            EventPriority::Normal,
        )
        .with_max_retries(2);
        assert!(!event.is_retry_exhausted());
        let event = event.with_incremented_retry();
        assert!(!event.is_retry_exhausted());
        let event = event.with_incremented_retry();
        assert!(event.is_retry_exhausted());
    }
}
