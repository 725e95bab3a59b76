//! [`PubSubCoordinator`]: topic registry, subscription registry and
//! publish/dispatch pipeline (§4.3).

use crate::filters::passes_all;
use crate::transforms::apply as apply_transforms;
use crate::types::{
    DeliveryGuarantee, DispatchMode, FilterSpec, Publication, Subscription, SubscriptionHandler,
    Topic, TransformSpec,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mr_event_bus::patterns::{dotted_match, glob_match};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("topic '{0}' not found")]
    TopicNotFound(String),
    #[error("topic '{0}' already exists")]
    TopicAlreadyExists(String),
    #[error("topic '{0}' has active subscriptions; pass force=true to delete")]
    TopicHasSubscribers(String),
    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),
}

pub type Result<T> = std::result::Result<T, PubSubError>;

fn topic_pattern_matches(pattern: &str, topic: &str) -> bool {
    pattern == topic || glob_match(pattern, topic) || dotted_match(pattern, topic)
}

struct PendingAck {
    publication: Publication,
    subscription_id: String,
    retry_count: u32,
    backoff_factor: f64,
    max_retries: u32,
    next_attempt_at: DateTime<Utc>,
}

pub struct PubSubConfig {
    pub backoff_factor: f64,
    pub max_retries: u32,
    pub retry_poll_interval: Duration,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self { backoff_factor: 2.0, max_retries: 5, retry_poll_interval: Duration::from_secs(5) }
    }
}

pub struct PubSubCoordinator {
    config: PubSubConfig,
    topics: Arc<DashMap<String, Arc<Mutex<Topic>>>>,
    subscriptions: Arc<DashMap<String, Arc<Subscription>>>,
    pending_acks: Arc<DashMap<String, PendingAck>>,
    publish_count: AtomicU64,
}

impl PubSubCoordinator {
    pub fn new(config: PubSubConfig) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            config,
            topics: Arc::new(DashMap::new()),
            subscriptions: Arc::new(DashMap::new()),
            pending_acks: Arc::new(DashMap::new()),
            publish_count: AtomicU64::new(0),
        });
        let retry_loop_handle = coordinator.clone();
        tokio::spawn(async move { retry_loop_handle.retry_loop().await });
        coordinator
    }

    pub fn create_topic(&self, name: impl Into<String>, dispatch_mode: DispatchMode) -> Result<String> {
        let name = name.into();
        if self.topics.contains_key(&name) {
            return Err(PubSubError::TopicAlreadyExists(name));
        }
        let topic = Topic::new(name.clone(), dispatch_mode);
        let id = topic.id.clone();
        self.topics.insert(name, Arc::new(Mutex::new(topic)));
        Ok(id)
    }

    pub fn delete_topic(&self, name: &str, force: bool) -> Result<()> {
        if !self.topics.contains_key(name) {
            return Err(PubSubError::TopicNotFound(name.to_string()));
        }
        let has_subscribers = self
            .subscriptions
            .iter()
            .any(|entry| topic_pattern_matches(&entry.pattern, name));
        if has_subscribers && !force {
            return Err(PubSubError::TopicHasSubscribers(name.to_string()));
        }
        self.topics.remove(name);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        pattern: impl Into<String>,
        handler: Arc<dyn SubscriptionHandler>,
        subscription_type: impl Into<String>,
        delivery_guarantee: DeliveryGuarantee,
        priority: i32,
        filters: Vec<FilterSpec>,
        transforms: Vec<TransformSpec>,
    ) -> String {
        let subscription = Subscription::new(
            subscriber_id,
            pattern,
            subscription_type,
            delivery_guarantee,
            priority,
            filters,
            transforms,
            handler,
        );
        let id = subscription.id.clone();
        self.subscriptions.insert(id.clone(), Arc::new(subscription));
        id
    }

    pub fn unsubscribe(&self, id: &str) -> Result<()> {
        self.subscriptions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PubSubError::SubscriptionNotFound(id.to_string()))
    }

    fn matching_subscriptions(&self, topic: &str) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .iter()
            .filter(|entry| topic_pattern_matches(&entry.pattern, topic))
            .map(|entry| entry.value().clone())
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        topic_name: &str,
        payload: serde_json::Value,
        publisher: impl Into<String>,
        priority: i32,
        delivery_guarantee: DeliveryGuarantee,
        expiry: Option<DateTime<Utc>>,
        correlation_id: Option<String>,
        tenant_id: Option<String>,
        headers: HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        let topic_arc = self
            .topics
            .get(topic_name)
            .map(|t| t.clone())
            .ok_or_else(|| PubSubError::TopicNotFound(topic_name.to_string()))?;

        let publication = Publication {
            id: Uuid::new_v4().to_string(),
            topic: topic_name.to_string(),
            payload,
            publisher: publisher.into(),
            priority,
            delivery_guarantee,
            expiry,
            correlation_id,
            tenant_id,
            headers,
            created_at: Utc::now(),
        };
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let dispatch_mode = { topic_arc.lock().dispatch_mode };
        let matching = self.matching_subscriptions(topic_name);
        let candidates: Vec<Arc<Subscription>> =
            matching.into_iter().filter(|sub| passes_all(&sub.filters, &publication)).collect();

        let targets = self.select_targets(dispatch_mode, &candidates, &topic_arc);
        for subscription in targets {
            self.deliver(&publication, &subscription).await;
        }

        topic_arc.lock().record(publication.clone());
        Ok(publication.id)
    }

    fn select_targets(
        &self,
        mode: DispatchMode,
        candidates: &[Arc<Subscription>],
        topic: &Arc<Mutex<Topic>>,
    ) -> Vec<Arc<Subscription>> {
        if candidates.is_empty() {
            return Vec::new();
        }
        match mode {
            DispatchMode::Broadcast => candidates.to_vec(),
            DispatchMode::RoundRobin => {
                let mut topic = topic.lock();
                let idx = topic.round_robin_cursor % candidates.len();
                topic.round_robin_cursor = topic.round_robin_cursor.wrapping_add(1);
                vec![candidates[idx].clone()]
            }
            DispatchMode::Priority => {
                candidates.iter().max_by_key(|s| s.priority).cloned().into_iter().collect()
            }
            DispatchMode::LoadBalanced => candidates
                .iter()
                .min_by_key(|s| s.active_count.load(Ordering::Relaxed))
                .cloned()
                .into_iter()
                .collect(),
        }
    }

    async fn deliver(&self, publication: &Publication, subscription: &Arc<Subscription>) {
        let transformed_payload = apply_transforms(&subscription.transforms, &publication.payload);
        let mut delivered = publication.clone();
        delivered.payload = transformed_payload;

        subscription.active_count.fetch_add(1, Ordering::Relaxed);
        let result = subscription.handler.handle(&delivered).await;
        subscription.active_count.fetch_sub(1, Ordering::Relaxed);

        match subscription.delivery_guarantee {
            DeliveryGuarantee::AtMostOnce => {
                if let Err(err) = result {
                    warn!(subscription_id = %subscription.id, error = %err, "at-most-once delivery failed, dropping");
                }
            }
            DeliveryGuarantee::AtLeastOnce | DeliveryGuarantee::ExactlyOnce => match result {
                Ok(true) => {}
                _ => {
                    let key = format!("{}:{}", publication.id, subscription.id);
                    self.pending_acks.insert(
                        key,
                        PendingAck {
                            publication: publication.clone(),
                            subscription_id: subscription.id.clone(),
                            retry_count: 0,
                            backoff_factor: self.config.backoff_factor,
                            max_retries: self.config.max_retries,
                            next_attempt_at: Utc::now(),
                        },
                    );
                }
            },
        }
    }

    /// Clears a pending at-least-once delivery; called when a
    /// `pubsub.subscription.ack` event is observed for this pair.
    pub fn ack(&self, publication_id: &str, subscription_id: &str) {
        self.pending_acks.remove(&format!("{publication_id}:{subscription_id}"));
    }

    async fn retry_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.retry_poll_interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let due: Vec<String> = self
                .pending_acks
                .iter()
                .filter(|entry| entry.next_attempt_at <= now)
                .map(|entry| entry.key().clone())
                .collect();

            for key in due {
                let Some((_, mut pending)) = self.pending_acks.remove(&key) else { continue };
                let Some(subscription) = self.subscriptions.get(&pending.subscription_id).map(|s| s.clone()) else {
                    continue;
                };
                pending.retry_count += 1;
                if pending.retry_count > pending.max_retries {
                    error!(publication_id = %pending.publication.id, subscription_id = %pending.subscription_id, "at-least-once delivery failed permanently");
                    continue;
                }
                let result = subscription.handler.handle(&pending.publication).await;
                match result {
                    Ok(true) => {}
                    _ => {
                        let delay_seconds = pending.backoff_factor.powi(pending.retry_count as i32).min(60.0);
                        pending.next_attempt_at = Utc::now() + chrono::Duration::seconds(delay_seconds as i64);
                        self.pending_acks.insert(key, pending);
                    }
                }
            }
        }
    }

    pub fn replay_messages(
        &self,
        topic_name: &str,
        subscriber_pattern: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        max: usize,
    ) -> Result<Vec<Publication>> {
        let topic = self
            .topics
            .get(topic_name)
            .map(|t| t.clone())
            .ok_or_else(|| PubSubError::TopicNotFound(topic_name.to_string()))?;
        let topic = topic.lock();
        let results: Vec<Publication> = topic
            .history
            .iter()
            .filter(|p| from.map(|f| p.created_at >= f).unwrap_or(true))
            .filter(|p| to.map(|t| p.created_at <= t).unwrap_or(true))
            .filter(|p| subscriber_pattern.map(|pat| topic_pattern_matches(pat, &p.topic)).unwrap_or(true))
            .take(max)
            .cloned()
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler(Arc<AtomicU32>);

    #[async_trait::async_trait]
    impl SubscriptionHandler for CountingHandler {
        async fn handle(&self, _publication: &Publication) -> anyhow::Result<bool> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_every_matching_subscriber() {
        let coordinator = PubSubCoordinator::new(PubSubConfig::default());
        coordinator.create_topic("orders.created", DispatchMode::Broadcast).unwrap();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        coordinator.subscribe("sub-a", "orders.*", Arc::new(CountingHandler(a.clone())), "order", DeliveryGuarantee::AtMostOnce, 0, vec![], vec![]);
        coordinator.subscribe("sub-b", "orders.*", Arc::new(CountingHandler(b.clone())), "order", DeliveryGuarantee::AtMostOnce, 0, vec![], vec![]);
        coordinator
            .publish("orders.created", serde_json::json!({}), "svc", 0, DeliveryGuarantee::AtMostOnce, None, None, None, HashMap::new())
            .await
            .unwrap();
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn round_robin_picks_one_subscriber_per_publish() {
        let coordinator = PubSubCoordinator::new(PubSubConfig::default());
        coordinator.create_topic("jobs", DispatchMode::RoundRobin).unwrap();
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        coordinator.subscribe("sub-a", "jobs", Arc::new(CountingHandler(a.clone())), "job", DeliveryGuarantee::AtMostOnce, 0, vec![], vec![]);
        coordinator.subscribe("sub-b", "jobs", Arc::new(CountingHandler(b.clone())), "job", DeliveryGuarantee::AtMostOnce, 0, vec![], vec![]);
        for _ in 0..2 {
            coordinator
                .publish("jobs", serde_json::json!({}), "svc", 0, DeliveryGuarantee::AtMostOnce, None, None, None, HashMap::new())
                .await
                .unwrap();
        }
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replay_messages_respects_max_and_time_window() {
        let coordinator = PubSubCoordinator::new(PubSubConfig::default());
        coordinator.create_topic("events", DispatchMode::Broadcast).unwrap();
        for i in 0..5 {
            coordinator
                .publish("events", serde_json::json!({"i": i}), "svc", 0, DeliveryGuarantee::AtMostOnce, None, None, None, HashMap::new())
                .await
                .unwrap();
        }
        let replayed = coordinator.replay_messages("events", None, None, None, 3).unwrap();
        assert_eq!(replayed.len(), 3);
    }
}
