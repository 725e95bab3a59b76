//! A single named [`MessageQueue`] (§4.2): selects a backing structure by
//! [`QueueType`], runs a promotion loop for not-yet-ready messages, and a
//! dispatcher loop that hands ready messages to registered consumers.

use crate::consumer::{
    select_consumer, BatchConsumer, BatchOutcome, Consumer, ConsumeOutcome, DispatchStrategy,
    RegisteredConsumer,
};
use crate::message::{backoff_delay_seconds, MessageStatus, PriorityKey, QueuedMessage, QueueType};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message '{0}' not found")]
    MessageNotFound(String),
    #[error("queue is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, QueueError>;

enum Backing {
    Priority(Mutex<BinaryHeap<PriorityKey>>),
    Fifo(Mutex<VecDeque<String>>),
    Lifo(Mutex<Vec<String>>),
    Delayed(Mutex<VecDeque<String>>),
    Batch(Mutex<VecDeque<String>>),
}

pub struct QueueConfig {
    pub name: String,
    pub queue_type: QueueType,
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_delays_seconds: Vec<u64>,
    pub dispatch_strategy: DispatchStrategy,
    pub batch_size: usize,
    pub batch_timeout: StdDuration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            queue_type: QueueType::Fifo,
            max_workers: 4,
            max_retries: 3,
            retry_delays_seconds: vec![1, 5, 15, 60],
            dispatch_strategy: DispatchStrategy::RoundRobin,
            batch_size: 20,
            batch_timeout: StdDuration::from_secs(5),
        }
    }
}

pub struct MessageQueue {
    pub config: QueueConfig,
    registry: Arc<DashMap<String, QueuedMessage>>,
    pending: Mutex<Vec<String>>,
    backing: Backing,
    notify: Notify,
    consumers: Mutex<Vec<Arc<RegisteredConsumer>>>,
    batch_consumer: Mutex<Option<Arc<dyn BatchConsumer>>>,
    round_robin_cursor: AtomicUsize,
    in_flight_permits: Arc<tokio::sync::Semaphore>,
    paused: AtomicBool,
    stopped: AtomicBool,
}

impl MessageQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let backing = match config.queue_type {
            QueueType::Priority => Backing::Priority(Mutex::new(BinaryHeap::new())),
            QueueType::Fifo => Backing::Fifo(Mutex::new(VecDeque::new())),
            QueueType::Lifo => Backing::Lifo(Mutex::new(Vec::new())),
            QueueType::Delayed => Backing::Delayed(Mutex::new(VecDeque::new())),
            QueueType::Batch => Backing::Batch(Mutex::new(VecDeque::new())),
        };
        let max_workers = config.max_workers.max(1);
        let queue = Arc::new(Self {
            registry: Arc::new(DashMap::new()),
            pending: Mutex::new(Vec::new()),
            backing,
            notify: Notify::new(),
            consumers: Mutex::new(Vec::new()),
            batch_consumer: Mutex::new(None),
            round_robin_cursor: AtomicUsize::new(0),
            in_flight_permits: Arc::new(tokio::sync::Semaphore::new(max_workers)),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            config,
        });

        {
            let queue = queue.clone();
            tokio::spawn(async move { queue.promotion_loop().await });
        }
        {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dispatch_loop().await });
        }

        queue
    }

    fn push_ready(&self, id: String, priority: i32, scheduled_time: chrono::DateTime<Utc>) {
        match &self.backing {
            Backing::Priority(heap) => heap.lock().push(PriorityKey { id, priority, scheduled_time }),
            Backing::Fifo(dq) => dq.lock().push_back(id),
            Backing::Lifo(stack) => stack.lock().push(id),
            Backing::Delayed(dq) => dq.lock().push_back(id),
            Backing::Batch(buf) => buf.lock().push_back(id),
        }
        self.notify.notify_waiters();
    }

    fn pop_ready(&self) -> Option<String> {
        match &self.backing {
            Backing::Priority(heap) => heap.lock().pop().map(|k| k.id),
            Backing::Fifo(dq) => dq.lock().pop_front(),
            Backing::Lifo(stack) => stack.lock().pop(),
            Backing::Delayed(dq) => dq.lock().pop_front(),
            Backing::Batch(buf) => buf.lock().pop_front(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        payload: serde_json::Value,
        priority: i32,
        scheduled_time: Option<chrono::DateTime<Utc>>,
        expiry: Option<chrono::DateTime<Utc>>,
        correlation_id: Option<String>,
        tenant_id: Option<String>,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> String {
        let scheduled_time = scheduled_time.unwrap_or_else(Utc::now);
        let message = QueuedMessage::new(
            self.config.name.clone(),
            payload,
            priority,
            scheduled_time,
            expiry,
            correlation_id,
            tenant_id,
            tags,
            metadata,
            self.config.max_retries,
        );
        let id = message.id.clone();
        let ready_now = message.is_ready(Utc::now());
        self.registry.insert(id.clone(), message);
        if ready_now {
            self.push_ready(id.clone(), priority, scheduled_time);
        } else {
            self.pending.lock().push(id.clone());
        }
        id
    }

    fn requeue_existing(&self, id: &str) {
        if let Some(message) = self.registry.get(id) {
            let now = Utc::now();
            if message.is_ready(now) {
                self.push_ready(id.to_string(), message.priority, message.scheduled_time);
            } else {
                self.pending.lock().push(id.to_string());
            }
        }
    }

    async fn promotion_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(StdDuration::from_millis(250));
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::Relaxed) {
                break;
            }
            let now = Utc::now();
            let ready_ids: Vec<String> = {
                let mut pending = self.pending.lock();
                let mut ready = Vec::new();
                pending.retain(|id| {
                    let still_pending = match self.registry.get(id) {
                        Some(message) if message.status == MessageStatus::Queued || message.status == MessageStatus::Retry => {
                            if message.is_ready(now) {
                                ready.push(id.clone());
                                false
                            } else {
                                true
                            }
                        }
                        _ => false,
                    };
                    still_pending
                });
                ready
            };
            for id in ready_ids {
                if let Some(message) = self.registry.get(&id) {
                    self.push_ready(id.clone(), message.priority, message.scheduled_time);
                }
            }
        }
    }

    /// Pulls the next non-expired, ready message, waiting up to `timeout`.
    pub async fn dequeue(&self, consumer_id: &str, timeout: StdDuration) -> Option<QueuedMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = self.pop_ready() {
                let now = Utc::now();
                let mut expired = false;
                if let Some(mut message) = self.registry.get_mut(&id) {
                    if message.is_expired(now) {
                        message.status = MessageStatus::Expired;
                        expired = true;
                    } else {
                        message.status = MessageStatus::Processing;
                        message.consumer_id = Some(consumer_id.to_string());
                        message.processing_at = Some(now);
                    }
                }
                if expired {
                    continue;
                }
                return self.registry.get(&id).map(|m| m.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }

    pub fn ack(&self, message_id: &str) -> Result<()> {
        let mut message = self
            .registry
            .get_mut(message_id)
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;
        message.status = MessageStatus::Completed;
        Ok(())
    }

    pub fn nack(&self, message_id: &str, error: &str) -> Result<()> {
        let mut message = self
            .registry
            .get_mut(message_id)
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;
        message.retry_count += 1;
        message.metadata.insert("last_error".to_string(), serde_json::json!(error));
        if message.retry_count > message.max_retries {
            message.status = MessageStatus::DeadLetter;
            warn!(message_id, "message moved to dead letter after exhausting retries");
            return Ok(());
        }
        let delay = backoff_delay_seconds(&self.config.retry_delays_seconds, message.retry_count);
        message.status = MessageStatus::Retry;
        message.scheduled_time = Utc::now() + chrono::Duration::seconds(delay as i64);
        drop(message);
        self.requeue_existing(message_id);
        Ok(())
    }

    pub fn register_consumer(&self, id: impl Into<String>, consumer: Arc<dyn Consumer>) {
        self.consumers.lock().push(Arc::new(RegisteredConsumer {
            id: id.into(),
            consumer,
            in_flight: AtomicUsize::new(0),
        }));
    }

    pub fn register_batch_consumer(&self, consumer: Arc<dyn BatchConsumer>) {
        *self.batch_consumer.lock() = Some(consumer);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn message(&self, id: &str) -> Option<QueuedMessage> {
        self.registry.get(id).map(|m| m.clone())
    }

    pub fn len_ready(&self) -> usize {
        match &self.backing {
            Backing::Priority(heap) => heap.lock().len(),
            Backing::Fifo(dq) => dq.lock().len(),
            Backing::Lifo(stack) => stack.lock().len(),
            Backing::Delayed(dq) => dq.lock().len(),
            Backing::Batch(buf) => buf.lock().len(),
        }
    }

    /// Messages currently `QUEUED` or `RETRY`, for persistence snapshots.
    pub fn persistable_messages(&self) -> Vec<QueuedMessage> {
        self.registry
            .iter()
            .filter(|entry| matches!(entry.status, MessageStatus::Queued | MessageStatus::Retry))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Re-admits messages loaded from a persistence snapshot.
    pub fn restore(&self, messages: Vec<QueuedMessage>) {
        for message in messages {
            let id = message.id.clone();
            let ready_now = message.is_ready(Utc::now());
            let (priority, scheduled_time) = (message.priority, message.scheduled_time);
            self.registry.insert(id.clone(), message);
            if ready_now {
                self.push_ready(id, priority, scheduled_time);
            } else {
                self.pending.lock().push(id);
            }
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        if self.config.queue_type == QueueType::Batch {
            self.batch_dispatch_loop().await;
        } else {
            self.standard_dispatch_loop().await;
        }
    }

    async fn standard_dispatch_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::Relaxed) {
                break;
            }
            if self.paused.load(Ordering::Relaxed) {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
                continue;
            }
            let consumers = self.consumers.lock().clone();
            if consumers.is_empty() {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
                continue;
            }
            let consumer_entry = match select_consumer(
                self.config.dispatch_strategy,
                &consumers,
                &self.round_robin_cursor,
            ) {
                Some(c) => c.clone(),
                None => continue,
            };

            let message = match self.dequeue(&consumer_entry.id, StdDuration::from_millis(500)).await {
                Some(m) => m,
                None => continue,
            };

            let permit = match self.in_flight_permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            consumer_entry.in_flight.fetch_add(1, Ordering::Relaxed);
            let queue = self.clone();
            let consumer_entry = consumer_entry.clone();
            let message_id = message.id.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = consumer_entry.consumer.consume(&message).await;
                consumer_entry.in_flight.fetch_sub(1, Ordering::Relaxed);
                match outcome {
                    Ok(ConsumeOutcome::Ack) => {
                        let _ = queue.ack(&message_id);
                    }
                    Ok(ConsumeOutcome::Nack(reason)) => {
                        let _ = queue.nack(&message_id, &reason);
                    }
                    Err(err) => {
                        error!(message_id = %message_id, error = %err, "consumer raised");
                        let _ = queue.nack(&message_id, &err.to_string());
                    }
                }
            });
        }
    }

    async fn batch_dispatch_loop(self: Arc<Self>) {
        let mut buffer: Vec<QueuedMessage> = Vec::new();
        let mut last_flush = Instant::now();
        loop {
            if self.stopped.load(Ordering::Relaxed) {
                break;
            }
            if self.paused.load(Ordering::Relaxed) {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
                continue;
            }
            if let Some(message) = self.dequeue("batch-collector", StdDuration::from_millis(200)).await {
                buffer.push(message);
            }

            let timed_out = last_flush.elapsed() >= self.config.batch_timeout;
            if buffer.is_empty() || (buffer.len() < self.config.batch_size && !timed_out) {
                continue;
            }

            let batch: Vec<QueuedMessage> = std::mem::take(&mut buffer);
            last_flush = Instant::now();
            let consumer = self.batch_consumer.lock().clone();
            let Some(consumer) = consumer else {
                debug!(queue = %self.config.name, size = batch.len(), "batch ready with no registered consumer");
                continue;
            };
            match consumer.consume_batch(&batch).await {
                Ok(BatchOutcome::All(ConsumeOutcome::Ack)) => {
                    for m in &batch {
                        let _ = self.ack(&m.id);
                    }
                }
                Ok(BatchOutcome::All(ConsumeOutcome::Nack(reason))) => {
                    for m in &batch {
                        let _ = self.nack(&m.id, &reason);
                    }
                }
                Ok(BatchOutcome::PerItem(outcomes)) => {
                    for (m, outcome) in batch.iter().zip(outcomes.into_iter()) {
                        match outcome {
                            ConsumeOutcome::Ack => {
                                let _ = self.ack(&m.id);
                            }
                            ConsumeOutcome::Nack(reason) => {
                                let _ = self.nack(&m.id, &reason);
                            }
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "batch consumer raised");
                    for m in &batch {
                        let _ = self.nack(&m.id, &err.to_string());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumeOutcome;
    use std::sync::atomic::AtomicU32;

    struct AckingConsumer(Arc<AtomicU32>);

    #[async_trait::async_trait]
    impl Consumer for AckingConsumer {
        async fn consume(&self, _message: &QueuedMessage) -> anyhow::Result<ConsumeOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ConsumeOutcome::Ack)
        }
    }

    #[tokio::test]
    async fn enqueue_dispatches_to_consumer_and_acks() {
        let queue = MessageQueue::new(QueueConfig { queue_type: QueueType::Fifo, ..Default::default() });
        let count = Arc::new(AtomicU32::new(0));
        queue.register_consumer("c1", Arc::new(AckingConsumer(count.clone())));
        let id = queue.enqueue(serde_json::json!({"x": 1}), 0, None, None, None, None, vec![], HashMap::new());
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.message(&id).unwrap().status, MessageStatus::Completed);
    }

    #[tokio::test]
    async fn nack_past_max_retries_dead_letters() {
        let queue = MessageQueue::new(QueueConfig {
            queue_type: QueueType::Fifo,
            max_retries: 1,
            retry_delays_seconds: vec![0],
            ..Default::default()
        });
        let id = queue.enqueue(serde_json::json!({}), 0, None, None, None, None, vec![], HashMap::new());
        let msg = queue.dequeue("c1", StdDuration::from_millis(200)).await.unwrap();
        queue.nack(&msg.id, "boom").unwrap();
        assert_eq!(queue.message(&id).unwrap().status, MessageStatus::Retry);
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let msg = queue.dequeue("c1", StdDuration::from_millis(200)).await.unwrap();
        queue.nack(&msg.id, "boom again").unwrap();
        assert_eq!(queue.message(&id).unwrap().status, MessageStatus::DeadLetter);
    }

    #[tokio::test]
    async fn expired_message_is_dropped_on_dequeue() {
        let queue = MessageQueue::new(QueueConfig { queue_type: QueueType::Fifo, ..Default::default() });
        let past = Utc::now() - chrono::Duration::seconds(5);
        let id = queue.enqueue(serde_json::json!({}), 0, None, Some(past), None, None, vec![], HashMap::new());
        let result = queue.dequeue("c1", StdDuration::from_millis(200)).await;
        assert!(result.is_none());
        assert_eq!(queue.message(&id).unwrap().status, MessageStatus::Expired);
    }

    #[tokio::test]
    async fn priority_queue_pops_highest_priority_first() {
        let queue = MessageQueue::new(QueueConfig { queue_type: QueueType::Priority, ..Default::default() });
        queue.enqueue(serde_json::json!({"p": "low"}), 1, None, None, None, None, vec![], HashMap::new());
        queue.enqueue(serde_json::json!({"p": "high"}), 9, None, None, None, None, vec![], HashMap::new());
        let first = queue.dequeue("c1", StdDuration::from_millis(200)).await.unwrap();
        assert_eq!(first.payload["p"], "high");
    }
}
