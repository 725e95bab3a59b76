//! Scaling coordinator data model (§3 `ScalingInstanceMetrics`, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPolicy {
    Manual,
    CpuBased,
    QueueBased,
    LatencyBased,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingInstanceMetrics {
    pub instance_id: String,
    pub cpu: f64,
    pub memory: f64,
    pub messages_per_second: f64,
    pub routing_latency_ms: f64,
    pub queue_depth: u64,
    pub health_score: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub error_rate: f64,
}

impl ScalingInstanceMetrics {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            cpu: 0.0,
            memory: 0.0,
            messages_per_second: 0.0,
            routing_latency_ms: 0.0,
            queue_depth: 0,
            health_score: 1.0,
            last_heartbeat: Utc::now(),
            uptime_seconds: 0,
            error_rate: 0.0,
        }
    }

    /// `0.3·(1 − latency/1000) + 0.4·(1 − error_rate) + 0.3·freshness`,
    /// clamped to `[0, 1]`.
    pub fn recompute_health_score(&mut self) {
        let latency_term = 1.0 - (self.routing_latency_ms / 1000.0);
        let error_term = 1.0 - self.error_rate;
        let freshness = {
            let age_seconds = (Utc::now() - self.last_heartbeat).num_seconds().max(0) as f64;
            (1.0 - age_seconds / 300.0).clamp(0.0, 1.0)
        };
        let score = 0.3 * latency_term + 0.4 * error_term + 0.3 * freshness;
        self.health_score = score.clamp(0.0, 1.0);
    }

    /// `0.4·(latency/1000) + 0.3·error_rate + 0.2·(load/1000) + 0.1·(1−health)`.
    pub fn load_score(&self) -> f64 {
        0.4 * (self.routing_latency_ms / 1000.0)
            + 0.3 * self.error_rate
            + 0.2 * (self.queue_depth as f64 / 1000.0)
            + 0.1 * (1.0 - self.health_score)
    }

    pub fn is_stale(&self, threshold: chrono::Duration) -> bool {
        Utc::now() - self.last_heartbeat > threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub id: String,
    pub action: ScalingAction,
    pub before_count: usize,
    pub after_count: usize,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ScalingEvent {
    pub fn new(action: ScalingAction, before_count: usize, after_count: usize, reason: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4().to_string(), action, before_count, after_count, reason: reason.into(), timestamp: Utc::now() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    Replace,
    NoOp,
}

#[derive(Debug, Clone)]
pub struct ScalingCoordinatorConfig {
    pub min_instances: usize,
    pub max_instances: usize,
    pub target_cpu: f64,
    pub target_mps: f64,
    pub target_latency_ms: f64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub cooldown_seconds: i64,
    pub policy: ScalingPolicy,
}

impl Default for ScalingCoordinatorConfig {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 10,
            target_cpu: 0.7,
            target_mps: 1000.0,
            target_latency_ms: 200.0,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown_seconds: 120,
            policy: ScalingPolicy::Hybrid,
        }
    }
}

/// `max(mps/target_mps, latency/target_latency, error_rate/0.05)`.
pub fn scaling_decision_factor(metrics: &ScalingInstanceMetrics, config: &ScalingCoordinatorConfig) -> f64 {
    let mps_ratio = metrics.messages_per_second / config.target_mps.max(f64::EPSILON);
    let latency_ratio = metrics.routing_latency_ms / config.target_latency_ms.max(f64::EPSILON);
    let error_ratio = metrics.error_rate / 0.05;
    mps_ratio.max(latency_ratio).max(error_ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_score_clamps_to_unit_interval() {
        let mut metrics = ScalingInstanceMetrics::new("i1");
        metrics.routing_latency_ms = 5000.0;
        metrics.error_rate = 2.0;
        metrics.recompute_health_score();
        assert!(metrics.health_score >= 0.0 && metrics.health_score <= 1.0);
    }

    #[test]
    fn scaling_decision_factor_picks_worst_ratio() {
        let config = ScalingCoordinatorConfig::default();
        let mut metrics = ScalingInstanceMetrics::new("i1");
        metrics.messages_per_second = 100.0;
        metrics.routing_latency_ms = 1000.0;
        metrics.error_rate = 0.01;
        let factor = scaling_decision_factor(&metrics, &config);
        assert!((factor - (1000.0 / config.target_latency_ms)).abs() < 1e-9);
    }
}
