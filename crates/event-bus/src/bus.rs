//! The event bus itself (§4.1): one priority queue per level, each drained
//! by an independent worker task, with retry/dead-letter semantics on
//! handler failure and a maintenance loop that reports health and reaps
//! old completed entries.

use crate::event::{Event, EventPriority, EventScope};
use crate::patterns::type_pattern_matches;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),
    #[error("event '{0}' not found")]
    EventNotFound(String),
    #[error("event bus queue for priority {0:?} is closed")]
    QueueClosed(EventPriority),
}

pub type Result<T> = std::result::Result<T, EventBusError>;

/// A handler invoked for events whose type/scope match this subscription.
/// `is_sync` marks handlers that should run behind the bounded worker pool
/// rather than inline, mirroring the source's sync/async handler split.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<bool>;
    fn is_sync(&self) -> bool {
        false
    }
}

pub struct FnHandler<F> {
    func: F,
    sync: bool,
}

impl<F> FnHandler<F> {
    pub fn new_async(func: F) -> Self {
        Self { func, sync: false }
    }

    pub fn new_sync(func: F) -> Self {
        Self { func, sync: true }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<bool> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<bool> {
        (self.func)(event)
    }

    fn is_sync(&self) -> bool {
        self.sync
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub id: String,
    pub pattern: String,
    pub subscriber: String,
    pub scope: EventScope,
    pub priority: i32,
    pub filters: HashMap<String, serde_json::Value>,
    pub handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn matches(&self, event: &Event) -> bool {
        if !type_pattern_matches(&self.pattern, &event.event_type) {
            return false;
        }
        if !event.scope.compatible_with(self.scope) {
            return false;
        }
        self.filters.iter().all(|(key, expected)| {
            event
                .metadata
                .get(key)
                .map(|actual| actual == expected)
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

#[derive(Clone)]
struct EventRecord {
    event: Event,
    status: EventStatus,
    updated_at: chrono::DateTime<Utc>,
}

pub struct EventBusConfig {
    pub max_retries: u32,
    pub worker_pool_size: usize,
    pub maintenance_interval: Duration,
    pub health_report_interval: Duration,
    pub completed_retention: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            worker_pool_size: 10,
            maintenance_interval: Duration::from_secs(60),
            health_report_interval: Duration::from_secs(60),
            completed_retention: Duration::from_secs(24 * 3600),
        }
    }
}

struct PriorityLane {
    sender: mpsc::UnboundedSender<Event>,
}

/// Single in-process event plane. One [`EventBus`] is shared (via `Arc`)
/// across every component that emits or subscribes to events.
pub struct EventBus {
    config: EventBusConfig,
    subscriptions: Arc<DashMap<String, Subscription>>,
    records: Arc<DashMap<String, EventRecord>>,
    failed: Arc<DashMap<String, Event>>,
    lanes: HashMap<EventPriority, PriorityLane>,
    worker_permits: Arc<Semaphore>,
    emitted_count: AtomicU64,
    dead_lettered_count: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Arc<Self> {
        let subscriptions = Arc::new(DashMap::new());
        let records = Arc::new(DashMap::new());
        let failed = Arc::new(DashMap::new());
        let worker_permits = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));

        let mut lanes = HashMap::new();
        let mut receivers = HashMap::new();
        for priority in EventPriority::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.insert(priority, PriorityLane { sender: tx });
            receivers.insert(priority, rx);
        }

        let bus = Arc::new(Self {
            config,
            subscriptions,
            records,
            failed,
            lanes,
            worker_permits,
            emitted_count: AtomicU64::new(0),
            dead_lettered_count: AtomicU64::new(0),
        });

        for (priority, rx) in receivers {
            let bus = bus.clone();
            tokio::spawn(async move { bus.drain_lane(priority, rx).await });
        }

        {
            let bus = bus.clone();
            tokio::spawn(async move { bus.maintenance_loop().await });
        }

        bus
    }

    async fn drain_lane(self: Arc<Self>, _priority: EventPriority, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, event: Event) {
        self.records.insert(
            event.id.clone(),
            EventRecord {
                event: event.clone(),
                status: EventStatus::Processing,
                updated_at: Utc::now(),
            },
        );

        let mut matching: Vec<Subscription> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|sub| sub.matches(&event))
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut all_succeeded = true;
        for sub in &matching {
            let outcome = if sub.handler.is_sync() {
                let permit = self.worker_permits.clone().acquire_owned().await;
                let handler = sub.handler.clone();
                let event_for_task = event.clone();
                let result = tokio::spawn(async move {
                    let _permit = permit;
                    handler.handle(&event_for_task).await
                })
                .await
                .unwrap_or_else(|join_err| Err(anyhow::anyhow!(join_err)));
                result
            } else {
                sub.handler.handle(&event).await
            };

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    warn!(event_id = %event.id, subscriber = %sub.subscriber, "handler returned failure");
                    all_succeeded = false;
                }
                Err(err) => {
                    warn!(event_id = %event.id, subscriber = %sub.subscriber, error = %err, "handler raised");
                    all_succeeded = false;
                }
            }
        }

        if all_succeeded {
            self.records.insert(
                event.id.clone(),
                EventRecord {
                    event,
                    status: EventStatus::Completed,
                    updated_at: Utc::now(),
                },
            );
            return;
        }

        if event.is_retry_exhausted() {
            self.dead_letter(event).await;
        } else {
            let retried = event.with_incremented_retry();
            self.records.insert(
                retried.id.clone(),
                EventRecord {
                    event: retried.clone(),
                    status: EventStatus::Queued,
                    updated_at: Utc::now(),
                },
            );
            self.enqueue_raw(retried);
        }
    }

    async fn dead_letter(self: &Arc<Self>, event: Event) {
        self.dead_lettered_count.fetch_add(1, Ordering::Relaxed);
        self.records.insert(
            event.id.clone(),
            EventRecord {
                event: event.clone(),
                status: EventStatus::DeadLettered,
                updated_at: Utc::now(),
            },
        );
        self.failed.insert(event.id.clone(), event.clone());
        error!(event_id = %event.id, event_type = %event.event_type, "event moved to dead letter");

        let dl_payload = serde_json::json!({
            "original_event_id": event.id,
            "original_event_type": event.event_type,
            "failure_reason": "handler_failure",
            "retry_count": event.retry_count,
        });
        let dl_event = Event::new(
            "system.event.dead_letter",
            dl_payload,
            "event-bus",
            EventScope::Global,
            EventPriority::High,
        );
        self.enqueue_raw(dl_event);
    }

    fn enqueue_raw(&self, event: Event) {
        if let Some(lane) = self.lanes.get(&event.priority) {
            if lane.sender.send(event).is_err() {
                error!("event bus lane closed, dropping event");
            }
        }
    }

    /// Emit a new event; returns its generated id.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        source: impl Into<String>,
        scope: EventScope,
        priority: EventPriority,
    ) -> String {
        let event = Event::new(event_type, payload, source, scope, priority)
            .with_max_retries(self.config.max_retries);
        let id = event.id.clone();
        self.records.insert(
            id.clone(),
            EventRecord {
                event: event.clone(),
                status: EventStatus::Queued,
                updated_at: Utc::now(),
            },
        );
        self.emitted_count.fetch_add(1, Ordering::Relaxed);
        self.enqueue_raw(event);
        id
    }

    pub fn publish_to_scope(
        &self,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        scope: EventScope,
        priority: EventPriority,
    ) -> String {
        self.emit(event_type, payload, "event-bus", scope, priority)
    }

    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        subscriber: impl Into<String>,
        scope: EventScope,
        priority: i32,
        filters: HashMap<String, serde_json::Value>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.subscriptions.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                pattern: pattern.into(),
                subscriber: subscriber.into(),
                scope,
                priority,
                filters,
                handler,
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: &str) -> Result<()> {
        self.subscriptions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EventBusError::SubscriptionNotFound(id.to_string()))
    }

    pub fn get_status(&self, event_id: &str) -> Result<EventStatus> {
        self.records
            .get(event_id)
            .map(|r| r.status)
            .ok_or_else(|| EventBusError::EventNotFound(event_id.to_string()))
    }

    /// Resets retry state and re-queues a dead-lettered event.
    pub fn replay_failed(&self, event_id: &str) -> Result<()> {
        let event = self
            .failed
            .remove(event_id)
            .map(|(_, e)| e)
            .ok_or_else(|| EventBusError::EventNotFound(event_id.to_string()))?;
        let mut replay = event;
        replay.retry_count = 0;
        self.records.insert(
            replay.id.clone(),
            EventRecord {
                event: replay.clone(),
                status: EventStatus::Queued,
                updated_at: Utc::now(),
            },
        );
        self.enqueue_raw(replay);
        Ok(())
    }

    fn queue_sizes_snapshot(&self) -> HashMap<EventPriority, usize> {
        // Sizes aren't tracked per-lane directly (mpsc doesn't expose len
        // cheaply); approximate via records still in Queued state.
        let mut sizes = HashMap::new();
        for priority in EventPriority::ALL {
            sizes.insert(priority, 0);
        }
        for entry in self.records.iter() {
            if entry.status == EventStatus::Queued {
                *sizes.entry(entry.event.priority).or_insert(0) += 1;
            }
        }
        sizes
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut maintenance_ticker = interval(self.config.maintenance_interval);
        let mut health_ticker = interval(self.config.health_report_interval);
        loop {
            tokio::select! {
                _ = maintenance_ticker.tick() => self.run_maintenance(),
                _ = health_ticker.tick() => self.report_health(),
            }
        }
    }

    fn run_maintenance(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.completed_retention).unwrap();
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.status == EventStatus::Completed && entry.updated_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            self.records.remove(&id);
        }
    }

    fn report_health(&self) {
        let sizes = self.queue_sizes_snapshot();
        debug!(
            queue_sizes = ?sizes,
            handler_count = self.subscriptions.len(),
            emitted = self.emitted_count.load(Ordering::Relaxed),
            dead_lettered = self.dead_lettered_count.load(Ordering::Relaxed),
            "system.event_bus.health"
        );
        self.emit(
            "system.event_bus.health",
            serde_json::json!({
                "queue_sizes": sizes.iter().map(|(p, n)| (format!("{:?}", p), n)).collect::<HashMap<_, _>>(),
                "handler_count": self.subscriptions.len(),
            }),
            "event-bus",
            EventScope::Global,
            EventPriority::Low,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler {
        calls: Arc<AtomicU32>,
        succeed_after: u32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(n + 1 >= self.succeed_after)
        }
    }

    #[tokio::test]
    async fn emit_and_handle_successful_event() {
        let bus = EventBus::new(EventBusConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        bus.subscribe(
            "test.*",
            Arc::new(CountingHandler { calls: calls.clone(), succeed_after: 1 }),
            "tester",
            EventScope::Global,
            0,
            HashMap::new(),
        );
        let id = bus.emit("test.ping", serde_json::json!({}), "tester", EventScope::Global, EventPriority::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.get_status(&id).unwrap(), EventStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_then_dead_letter_on_persistent_failure() {
        let mut config = EventBusConfig::default();
        config.max_retries = 2;
        let bus = EventBus::new(config);
        let calls = Arc::new(AtomicU32::new(0));
        bus.subscribe(
            "test.*",
            Arc::new(CountingHandler { calls: calls.clone(), succeed_after: u32::MAX }),
            "tester",
            EventScope::Global,
            0,
            HashMap::new(),
        );
        let id = bus.emit("test.fail", serde_json::json!({}), "tester", EventScope::Global, EventPriority::Normal);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.get_status(&id).unwrap(), EventStatus::DeadLettered);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn scope_mismatch_is_never_dispatched() {
        let bus = EventBus::new(EventBusConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        bus.subscribe(
            "test.*",
            Arc::new(CountingHandler { calls: calls.clone(), succeed_after: 1 }),
            "tester",
            EventScope::Tenant,
            0,
            HashMap::new(),
        );
        bus.emit("test.ping", serde_json::json!({}), "tester", EventScope::Hybrid, EventPriority::Normal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
