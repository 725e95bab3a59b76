//! Async Health Checker
//!
//! Supervises per-service health probes and aggregates their status.
//! Each registered check runs in its own supervisor task, independent of
//! the others, and the manager aggregates the worst observed status across
//! all of them on a fixed cadence.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, warn};

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Higher value is more critical; used to pick the worst of several statuses.
    pub fn priority(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Unknown => 3,
        }
    }

    pub fn is_problematic(&self) -> bool {
        matches!(self, HealthStatus::Degraded | HealthStatus::Unhealthy | HealthStatus::Unknown)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: SystemTime,
    pub duration_ms: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub name: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub degraded_threshold_ms: u64,
    pub unhealthy_threshold: u32,
    pub enabled: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            interval_seconds: 30,
            timeout_seconds: 10,
            retries: 2,
            retry_delay_ms: 500,
            degraded_threshold_ms: 1_000,
            unhealthy_threshold: 3,
            enabled: true,
        }
    }
}

/// Per-service rolling metrics, capped history per §3 HealthMetrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub status: HealthStatus,
    pub last_check: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
    pub response_time_ms: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub uptime_percentage: f64,
    #[serde(skip)]
    history: VecDeque<HealthCheckResult>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_check: None,
            last_success: None,
            last_failure: None,
            response_time_ms: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            uptime_percentage: 100.0,
            history: VecDeque::new(),
        }
    }
}

const HEALTH_HISTORY_CAP: usize = 100;

/// Health check trait; the check function is user-supplied and must be idempotent.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<HealthCheckResult>;
    fn name(&self) -> &str;
    fn config(&self) -> &HealthCheckConfig;
}

/// Health check that always reports healthy; useful as a wiring placeholder.
pub struct SimpleHealthCheck {
    config: HealthCheckConfig,
}

impl SimpleHealthCheck {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HealthCheck for SimpleHealthCheck {
    async fn check(&self) -> Result<HealthCheckResult> {
        Ok(HealthCheckResult {
            status: HealthStatus::Healthy,
            message: "ok".to_string(),
            timestamp: SystemTime::now(),
            duration_ms: 0,
            metadata: HashMap::new(),
        })
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &HealthCheckConfig {
        &self.config
    }
}

/// HTTP health check against an endpoint's liveness URL.
pub struct HttpHealthCheck {
    config: HealthCheckConfig,
    url: String,
    client: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new(config: HealthCheckConfig, url: String) -> Self {
        Self { config, url, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self) -> Result<HealthCheckResult> {
        let start_time = SystemTime::now();
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let response = tokio::time::timeout(timeout, self.client.get(&self.url).send()).await;
        let duration = start_time.elapsed().unwrap_or_default().as_millis() as u64;

        let (status, message, mut metadata) = match response {
            Ok(Ok(resp)) => {
                let status = if resp.status().is_success() { HealthStatus::Healthy } else { HealthStatus::Degraded };
                let mut metadata = HashMap::new();
                metadata.insert("status_code".to_string(), resp.status().as_u16().into());
                (status, format!("HTTP check returned status {}", resp.status()), metadata)
            }
            Ok(Err(e)) => {
                let mut metadata = HashMap::new();
                metadata.insert("error".to_string(), e.to_string().into());
                (HealthStatus::Unhealthy, format!("HTTP check failed: {}", e), metadata)
            }
            Err(_) => {
                (HealthStatus::Unhealthy, "HTTP check timed out".to_string(), HashMap::new())
            }
        };
        metadata.insert("url".to_string(), self.url.clone().into());

        Ok(HealthCheckResult { status, message, timestamp: SystemTime::now(), duration_ms: duration, metadata })
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &HealthCheckConfig {
        &self.config
    }
}

/// Overall aggregated snapshot, mirrored to the shared store by the manager's
/// aggregator loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub overall: HealthStatus,
    pub services: HashMap<String, HealthMetrics>,
    pub timestamp: SystemTime,
}

/// Persists the aggregated snapshot to a shared store (e.g. `taxpoynt:health_status`,
/// TTL 300s). `None` for single-process use.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &HealthSnapshot) -> anyhow::Result<()>;
}

/// Health check manager: registry + per-check supervisor loops + aggregator.
pub struct HealthCheckManager {
    checks: Arc<RwLock<HashMap<String, Arc<dyn HealthCheck>>>>,
    metrics: Arc<RwLock<HashMap<String, HealthMetrics>>>,
    started: AtomicBool,
    store: Option<Arc<dyn HealthStore>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self {
            checks: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(HashMap::new())),
            started: AtomicBool::new(false),
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn HealthStore>) -> Self {
        Self {
            checks: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(HashMap::new())),
            started: AtomicBool::new(false),
            store: Some(store),
        }
    }

    pub async fn add_check(&self, check: Arc<dyn HealthCheck>) {
        let name = check.name().to_string();
        self.checks.write().await.insert(name.clone(), check);
        self.metrics.write().await.insert(name, HealthMetrics::default());
    }

    pub async fn remove_check(&self, name: &str) {
        self.checks.write().await.remove(name);
        self.metrics.write().await.remove(name);
    }

    /// Run one check immediately, with the check's configured retries, and
    /// fold the outcome into its rolling metrics.
    pub async fn run_check(&self, name: &str) -> Result<HealthCheckResult> {
        let check = {
            let checks = self.checks.read().await;
            checks.get(name).cloned()
        };
        let Some(check) = check else {
            return Err(anyhow::anyhow!("health check '{}' not found", name));
        };
        let result = run_with_retries(check.as_ref()).await;
        self.update_metrics(name, &result).await;
        Ok(result)
    }

    pub async fn run_all_checks(&self) -> HashMap<String, HealthCheckResult> {
        let checks = { self.checks.read().await.clone() };
        let mut results = HashMap::new();
        for (name, check) in checks {
            if check.config().enabled {
                let result = run_with_retries(check.as_ref()).await;
                self.update_metrics(&name, &result).await;
                results.insert(name, result);
            }
        }
        results
    }

    pub async fn get_overall_health(&self) -> HealthStatus {
        let metrics = self.metrics.read().await;
        if metrics.is_empty() {
            return HealthStatus::Unknown;
        }
        metrics
            .values()
            .map(|m| m.status)
            .max_by_key(|s| s.priority())
            .unwrap_or(HealthStatus::Unknown)
    }

    pub async fn get_all_metrics(&self) -> HashMap<String, HealthMetrics> {
        self.metrics.read().await.clone()
    }

    pub async fn get_health_status(&self) -> HealthSnapshot {
        HealthSnapshot {
            overall: self.get_overall_health().await,
            services: self.get_all_metrics().await,
            timestamp: SystemTime::now(),
        }
    }

    /// Spawn one supervisor task per registered check plus an aggregator
    /// that writes the overall snapshot to the shared store every 10s.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let checks = { self.checks.read().await.clone() };
        for (name, check) in checks {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.supervise(name, check).await;
            });
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(10));
            loop {
                tick.tick().await;
                let snapshot = manager.get_health_status().await;
                if let Some(store) = &manager.store {
                    if let Err(e) = store.save_snapshot(&snapshot).await {
                        warn!(error = %e, "failed to persist health snapshot");
                    }
                }
            }
        });
    }

    async fn supervise(self: &Arc<Self>, name: String, check: Arc<dyn HealthCheck>) {
        let mut tick = interval(Duration::from_secs(check.config().interval_seconds));
        loop {
            tick.tick().await;
            if !check.config().enabled {
                continue;
            }
            let result = run_with_retries(check.as_ref()).await;
            self.update_metrics(&name, &result).await;
        }
    }

    async fn update_metrics(&self, name: &str, result: &HealthCheckResult) {
        let unhealthy_threshold = {
            let checks = self.checks.read().await;
            checks.get(name).map(|c| c.config().unhealthy_threshold).unwrap_or(3)
        };
        let degraded_threshold_ms = {
            let checks = self.checks.read().await;
            checks.get(name).map(|c| c.config().degraded_threshold_ms).unwrap_or(1_000)
        };

        let mut metrics = self.metrics.write().await;
        let entry = metrics.entry(name.to_string()).or_insert_with(HealthMetrics::default);

        entry.last_check = Some(result.timestamp);
        entry.response_time_ms = result.duration_ms;
        entry.history.push_back(result.clone());
        while entry.history.len() > HEALTH_HISTORY_CAP {
            entry.history.pop_front();
        }

        if result.status.is_problematic() {
            entry.failure_count += 1;
            entry.consecutive_failures += 1;
            entry.last_failure = Some(result.timestamp);
        } else {
            entry.success_count += 1;
            entry.consecutive_failures = 0;
            entry.last_success = Some(result.timestamp);
        }

        let total = entry.success_count + entry.failure_count;
        entry.uptime_percentage = if total == 0 { 100.0 } else { entry.success_count as f64 / total as f64 * 100.0 };

        entry.status = if entry.consecutive_failures >= unhealthy_threshold {
            HealthStatus::Unhealthy
        } else if result.duration_ms > degraded_threshold_ms || entry.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }
}

async fn run_with_retries(check: &dyn HealthCheck) -> HealthCheckResult {
    let config = check.config();
    let mut attempt = 0;
    loop {
        let start = SystemTime::now();
        let timeout = Duration::from_secs(config.timeout_seconds);
        let outcome = tokio::time::timeout(timeout, check.check()).await;
        let duration_ms = start.elapsed().unwrap_or_default().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(mut result)) => {
                result.duration_ms = duration_ms;
                if result.duration_ms > config.degraded_threshold_ms && result.status == HealthStatus::Healthy {
                    result.status = HealthStatus::Degraded;
                }
                Some(result)
            }
            Ok(Err(e)) => {
                error!(check = check.name(), error = %e, "health check errored");
                None
            }
            Err(_) => {
                warn!(check = check.name(), "health check timed out");
                None
            }
        };

        if let Some(result) = result {
            if !result.status.is_problematic() {
                return result;
            }
            if attempt >= config.retries {
                return result;
            }
        } else if attempt >= config.retries {
            return HealthCheckResult {
                status: HealthStatus::Unhealthy,
                message: "health check failed after retries".to_string(),
                timestamp: SystemTime::now(),
                duration_ms,
                metadata: HashMap::new(),
            };
        }

        attempt += 1;
        tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
    }
}

impl Default for HealthCheckManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_priority_orders_worst_first() {
        assert_eq!(HealthStatus::Healthy.priority(), 0);
        assert_eq!(HealthStatus::Degraded.priority(), 1);
        assert_eq!(HealthStatus::Unhealthy.priority(), 2);
        assert_eq!(HealthStatus::Unknown.priority(), 3);
    }

    #[tokio::test]
    async fn is_problematic_matches_non_healthy_states() {
        assert!(!HealthStatus::Healthy.is_problematic());
        assert!(HealthStatus::Degraded.is_problematic());
        assert!(HealthStatus::Unhealthy.is_problematic());
        assert!(HealthStatus::Unknown.is_problematic());
    }

    #[tokio::test]
    async fn simple_check_reports_healthy() {
        let config = HealthCheckConfig::default();
        let check = SimpleHealthCheck::new(config);
        let result = check.check().await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn manager_runs_and_aggregates() {
        let manager = HealthCheckManager::new();
        let check = Arc::new(SimpleHealthCheck::new(HealthCheckConfig {
            name: "svc".to_string(),
            ..Default::default()
        }));
        manager.add_check(check).await;

        let result = manager.run_check("svc").await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(manager.get_overall_health().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn manager_remove_check_drops_metrics() {
        let manager = HealthCheckManager::new();
        let check = Arc::new(SimpleHealthCheck::new(HealthCheckConfig {
            name: "svc".to_string(),
            ..Default::default()
        }));
        manager.add_check(check).await;
        assert!(manager.run_check("svc").await.is_ok());

        manager.remove_check("svc").await;
        assert!(manager.run_check("svc").await.is_err());
    }

    struct FailingCheck(HealthCheckConfig, std::sync::atomic::AtomicU32);

    #[async_trait]
    impl HealthCheck for FailingCheck {
        async fn check(&self) -> Result<HealthCheckResult> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(HealthCheckResult {
                status: HealthStatus::Unhealthy,
                message: "down".to_string(),
                timestamp: SystemTime::now(),
                duration_ms: 1,
                metadata: HashMap::new(),
            })
        }
        fn name(&self) -> &str {
            &self.0.name
        }
        fn config(&self) -> &HealthCheckConfig {
            &self.0
        }
    }

    #[tokio::test]
    async fn unhealthy_check_retries_configured_number_of_times() {
        let config = HealthCheckConfig {
            name: "flaky".to_string(),
            retries: 2,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let calls = std::sync::atomic::AtomicU32::new(0);
        let check = FailingCheck(config, calls);
        let result = run_with_retries(&check).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(check.1.load(Ordering::SeqCst), 3);
    }
}
