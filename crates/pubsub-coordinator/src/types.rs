//! Topic, subscription and publication data model (§4.3).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Broadcast,
    RoundRobin,
    Priority,
    LoadBalanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub name: String,
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpec {
    pub name: String,
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub publisher: String,
    pub priority: i32,
    pub delivery_guarantee: DeliveryGuarantee,
    pub expiry: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub tenant_id: Option<String>,
    pub headers: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Publication {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|t| t <= now).unwrap_or(false)
    }
}

#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn handle(&self, publication: &Publication) -> anyhow::Result<bool>;
}

pub struct Subscription {
    pub id: String,
    pub subscriber_id: String,
    pub pattern: String,
    pub subscription_type: String,
    pub delivery_guarantee: DeliveryGuarantee,
    pub priority: i32,
    pub filters: Vec<FilterSpec>,
    pub transforms: Vec<TransformSpec>,
    pub handler: std::sync::Arc<dyn SubscriptionHandler>,
    pub active_count: AtomicUsize,
}

impl Subscription {
    pub fn new(
        subscriber_id: impl Into<String>,
        pattern: impl Into<String>,
        subscription_type: impl Into<String>,
        delivery_guarantee: DeliveryGuarantee,
        priority: i32,
        filters: Vec<FilterSpec>,
        transforms: Vec<TransformSpec>,
        handler: std::sync::Arc<dyn SubscriptionHandler>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subscriber_id: subscriber_id.into(),
            pattern: pattern.into(),
            subscription_type: subscription_type.into(),
            delivery_guarantee,
            priority,
            filters,
            transforms,
            handler,
            active_count: AtomicUsize::new(0),
        }
    }
}

pub struct Topic {
    pub id: String,
    pub name: String,
    pub dispatch_mode: DispatchMode,
    pub created_at: DateTime<Utc>,
    pub history: std::collections::VecDeque<Publication>,
    pub round_robin_cursor: usize,
}

pub const HISTORY_CAPACITY: usize = 1000;

impl Topic {
    pub fn new(name: impl Into<String>, dispatch_mode: DispatchMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            dispatch_mode,
            created_at: Utc::now(),
            history: std::collections::VecDeque::with_capacity(HISTORY_CAPACITY),
            round_robin_cursor: 0,
        }
    }

    pub fn record(&mut self, publication: Publication) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(publication);
    }
}
