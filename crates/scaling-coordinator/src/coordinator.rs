//! [`ScalingCoordinator`] (§4.6): maintains a pool of router instances,
//! collects their stats, evaluates health, and scales the pool up/down.

use crate::types::{
    scaling_decision_factor, ScalingAction, ScalingCoordinatorConfig, ScalingEvent, ScalingInstanceMetrics,
    ScalingPolicy,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mr_shared_store::{keys, SharedStore, SharedStoreJsonExt};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ScalingError {
    #[error("no instances available to receive a distributed message")]
    NoInstancesAvailable,
    #[error("instance lifecycle error: {0}")]
    Lifecycle(String),
    #[error("shared store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, ScalingError>;

/// Abstraction over actually spawning/destroying a router instance
/// (process, task, or container) so this crate stays decoupled from
/// `message-router`'s construction details.
#[async_trait]
pub trait InstanceLifecycle: Send + Sync {
    async fn spawn(&self) -> anyhow::Result<String>;
    async fn destroy(&self, instance_id: &str) -> anyhow::Result<()>;
}

pub struct ScalingCoordinator<S: SharedStore, L: InstanceLifecycle> {
    config: ScalingCoordinatorConfig,
    store: Arc<S>,
    lifecycle: Arc<L>,
    instances: Arc<DashMap<String, ScalingInstanceMetrics>>,
    last_scaling_action: AtomicI64,
    scaling_lock: Mutex<()>,
}

impl<S: SharedStore + 'static, L: InstanceLifecycle + 'static> ScalingCoordinator<S, L> {
    pub async fn new(config: ScalingCoordinatorConfig, store: Arc<S>, lifecycle: Arc<L>) -> Result<Arc<Self>> {
        let coordinator = Arc::new(Self {
            config,
            store,
            lifecycle,
            instances: Arc::new(DashMap::new()),
            last_scaling_action: AtomicI64::new(0),
            scaling_lock: Mutex::new(()),
        });
        coordinator.ensure_minimum_instances().await?;

        {
            let c = coordinator.clone();
            tokio::spawn(async move { c.stats_loop().await });
        }
        {
            let c = coordinator.clone();
            tokio::spawn(async move { c.health_evaluation_loop().await });
        }
        {
            let c = coordinator.clone();
            tokio::spawn(async move { c.scaling_decision_loop().await });
        }

        Ok(coordinator)
    }

    async fn ensure_minimum_instances(&self) -> Result<()> {
        while self.instances.len() < self.config.min_instances {
            self.spawn_instance("startup minimum").await?;
        }
        Ok(())
    }

    async fn spawn_instance(&self, reason: &str) -> Result<String> {
        let id = self.lifecycle.spawn().await.map_err(|e| ScalingError::Lifecycle(e.to_string()))?;
        self.instances.insert(id.clone(), ScalingInstanceMetrics::new(id.clone()));
        info!(instance_id = %id, reason, "spawned router instance");
        Ok(id)
    }

    async fn destroy_instance(&self, id: &str) -> Result<()> {
        self.lifecycle.destroy(id).await.map_err(|e| ScalingError::Lifecycle(e.to_string()))?;
        self.instances.remove(id);
        Ok(())
    }

    pub fn update_metrics(&self, instance_id: &str, mutate: impl FnOnce(&mut ScalingInstanceMetrics)) {
        if let Some(mut metrics) = self.instances.get_mut(instance_id) {
            mutate(&mut metrics);
            metrics.last_heartbeat = Utc::now();
            metrics.recompute_health_score();
        }
    }

    /// Selects the instance with the lowest load score and returns its id;
    /// callers are responsible for actually delivering the message there.
    pub fn distribute_message(&self) -> Result<String> {
        self.instances
            .iter()
            .min_by(|a, b| a.load_score().partial_cmp(&b.load_score()).unwrap_or(std::cmp::Ordering::Equal))
            .map(|entry| entry.key().clone())
            .ok_or(ScalingError::NoInstancesAvailable)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    async fn stats_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            ticker.tick().await;
            for entry in self.instances.iter() {
                let key = keys::scaling_metrics(entry.key());
                if let Err(err) = self.store.set_with_ttl(&key, &serde_json::to_string(entry.value()).unwrap_or_default(), std::time::Duration::from_secs(120)).await {
                    warn!(error = %err, instance_id = %entry.key(), "failed to persist instance stats");
                }
            }
        }
    }

    async fn health_evaluation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let unhealthy: Vec<String> = self
                .instances
                .iter()
                .filter(|entry| entry.health_score < 0.3 && entry.is_stale(chrono::Duration::minutes(5)))
                .map(|entry| entry.key().clone())
                .collect();
            for id in unhealthy {
                warn!(instance_id = %id, "destroying unhealthy instance");
                let before = self.instance_count();
                if let Err(err) = self.destroy_instance(&id).await {
                    error!(instance_id = %id, error = %err, "failed to destroy unhealthy instance");
                    continue;
                }
                if self.instance_count() < self.config.min_instances {
                    if let Ok(new_id) = self.spawn_instance("replace unhealthy instance").await {
                        self.log_event(ScalingEvent::new(ScalingAction::Replace, before, self.instance_count(), format!("replaced unhealthy instance {id} with {new_id}"))).await;
                    }
                }
            }
        }
    }

    async fn scaling_decision_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if self.config.policy == ScalingPolicy::Manual {
                continue;
            }
            let now = Utc::now().timestamp();
            let last = self.last_scaling_action.load(Ordering::Relaxed);
            if now - last < self.config.cooldown_seconds {
                continue;
            }
            let _guard = self.scaling_lock.lock().await;
            let avg_factor = self.average_decision_factor();
            let before = self.instance_count();

            if avg_factor > self.config.scale_up_threshold && before < self.config.max_instances {
                if let Ok(new_id) = self.spawn_instance("scale up").await {
                    self.last_scaling_action.store(now, Ordering::Relaxed);
                    self.log_event(ScalingEvent::new(ScalingAction::ScaleUp, before, self.instance_count(), format!("factor {avg_factor:.2} exceeded scale_up_threshold, spawned {new_id}"))).await;
                }
            } else if avg_factor < self.config.scale_down_threshold && before > self.config.min_instances {
                if let Some(weakest) = self.weakest_instance() {
                    if self.destroy_instance(&weakest).await.is_ok() {
                        self.last_scaling_action.store(now, Ordering::Relaxed);
                        self.log_event(ScalingEvent::new(ScalingAction::ScaleDown, before, self.instance_count(), format!("factor {avg_factor:.2} below scale_down_threshold, destroyed {weakest}"))).await;
                    }
                }
            }
        }
    }

    fn average_decision_factor(&self) -> f64 {
        if self.instances.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.instances.iter().map(|entry| scaling_decision_factor(&entry, &self.config)).sum();
        sum / self.instances.len() as f64
    }

    fn weakest_instance(&self) -> Option<String> {
        self.instances
            .iter()
            .min_by(|a, b| a.health_score.partial_cmp(&b.health_score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|entry| entry.key().clone())
    }

    /// Clamps `target` to `[min, max]` and spawns/retires to match,
    /// preferring destruction of the lowest-health instances.
    pub async fn manual_scale(&self, target: usize) -> Result<()> {
        let target = target.clamp(self.config.min_instances, self.config.max_instances);
        let before = self.instance_count();
        while self.instance_count() < target {
            self.spawn_instance("manual scale up").await?;
        }
        while self.instance_count() > target {
            let Some(weakest) = self.weakest_instance() else { break };
            self.destroy_instance(&weakest).await?;
        }
        self.log_event(ScalingEvent::new(
            if target > before { ScalingAction::ScaleUp } else if target < before { ScalingAction::ScaleDown } else { ScalingAction::NoOp },
            before,
            self.instance_count(),
            format!("manual scale to {target}"),
        ))
        .await;
        Ok(())
    }

    async fn log_event(&self, event: ScalingEvent) {
        let _ = self
            .store
            .zadd(&keys::scaling_events(), &event.id, event.timestamp.timestamp() as f64)
            .await;
        let _ = self.store.hset_json(&keys::scaling_coordinator(), &event.id, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mr_shared_store::InMemoryStore;
    use std::sync::atomic::AtomicU32;

    struct FakeLifecycle(AtomicU32);

    #[async_trait]
    impl InstanceLifecycle for FakeLifecycle {
        async fn spawn(&self) -> anyhow::Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("instance-{n}"))
        }

        async fn destroy(&self, _instance_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn starts_with_minimum_instance_count() {
        let coordinator = ScalingCoordinator::new(
            ScalingCoordinatorConfig { min_instances: 2, ..Default::default() },
            Arc::new(InMemoryStore::new()),
            Arc::new(FakeLifecycle(AtomicU32::new(0))),
        )
        .await
        .unwrap();
        assert_eq!(coordinator.instance_count(), 2);
    }

    #[tokio::test]
    async fn manual_scale_clamps_to_bounds() {
        let coordinator = ScalingCoordinator::new(
            ScalingCoordinatorConfig { min_instances: 1, max_instances: 3, ..Default::default() },
            Arc::new(InMemoryStore::new()),
            Arc::new(FakeLifecycle(AtomicU32::new(0))),
        )
        .await
        .unwrap();
        coordinator.manual_scale(10).await.unwrap();
        assert_eq!(coordinator.instance_count(), 3);
        coordinator.manual_scale(0).await.unwrap();
        assert_eq!(coordinator.instance_count(), 1);
    }

    #[tokio::test]
    async fn distribute_message_picks_lowest_load_instance() {
        let coordinator = ScalingCoordinator::new(
            ScalingCoordinatorConfig { min_instances: 2, ..Default::default() },
            Arc::new(InMemoryStore::new()),
            Arc::new(FakeLifecycle(AtomicU32::new(0))),
        )
        .await
        .unwrap();
        coordinator.update_metrics("instance-0", |m| m.queue_depth = 500);
        coordinator.update_metrics("instance-1", |m| m.queue_depth = 10);
        assert_eq!(coordinator.distribute_message().unwrap(), "instance-1");
    }
}
