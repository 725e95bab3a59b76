//! Circuit Breaker Pattern Implementation
//!
//! Prevents cascading failures by automatically detecting failures
//! and temporarily stopping requests to failing services.
//!
//! States:
//! - CLOSED: Normal operation
//! - OPEN: Failing, reject all requests
//! - HALF_OPEN: Testing if service has recovered
//!
//! One breaker instance guards one named target. Rolling failure history is
//! kept in-memory and, when a store is attached, mirrored to a shared sorted
//! set so a fresh replica can read current state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

/// Error thrown when circuit breaker is open
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String, stats: CircuitBreakerStats },
    #[error("circuit breaker '{name}' operation timed out")]
    Timeout { name: String },
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    fn code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration. Field names follow the shared reliability
/// contract rather than the original Rust-only defaults so they line up with
/// how the rest of the platform configures a breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub name: String,
    pub failure_threshold: u64,
    pub success_threshold: u64,
    pub timeout_ms: u64,
    pub rolling_window_ms: u64,
    pub recovery_timeout_ms: u64,
    pub max_concurrent_half_open: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "unnamed".to_string(),
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms: 30_000,
            rolling_window_ms: 60_000,
            recovery_timeout_ms: 60_000,
            max_concurrent_half_open: 1,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub consecutive_successes: u64,
    pub total_requests: u64,
    pub timeouts: u64,
    pub rolling_failure_count: usize,
    pub last_failure: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
}

/// Persists circuit breaker state to a shared store so a fresh replica can
/// read the current state instead of starting CLOSED with cold metrics.
/// Implemented by `mr-shared-store`'s Redis backend; left unimplemented
/// (`None` attached) for single-process use.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync {
    async fn save_state(&self, name: &str, stats: &CircuitBreakerStats) -> anyhow::Result<()>;
    async fn record_failure(&self, name: &str, at_unix_ms: i64) -> anyhow::Result<()>;
    async fn prune_failures(&self, name: &str, before_unix_ms: i64) -> anyhow::Result<()>;
}

/// Circuit breaker for resilience.
///
/// Automatically detects failures and stops calling failing operations.
/// Allows for automatic recovery testing after a timeout period.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    consecutive_successes: AtomicU64,
    total_requests: AtomicU64,
    timeouts: AtomicU64,
    next_attempt: Arc<RwLock<Instant>>,
    last_failure: Arc<RwLock<Option<SystemTime>>>,
    last_success: Arc<RwLock<Option<SystemTime>>>,
    rolling_failures: Arc<RwLock<VecDeque<Instant>>>,
    half_open_permits: Semaphore,
    store: Option<Arc<dyn CircuitBreakerStore>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_store(config, None)
    }

    pub fn with_store(config: CircuitBreakerConfig, store: Option<Arc<dyn CircuitBreakerStore>>) -> Self {
        let max_half_open = config.max_concurrent_half_open.max(1);
        Self {
            next_attempt: Arc::new(RwLock::new(Instant::now())),
            last_failure: Arc::new(RwLock::new(None)),
            last_success: Arc::new(RwLock::new(None)),
            rolling_failures: Arc::new(RwLock::new(VecDeque::new())),
            half_open_permits: Semaphore::new(max_half_open),
            state: AtomicU8::new(0),
            consecutive_failures: AtomicU64::new(0),
            consecutive_successes: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            config,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Execute an operation with circuit breaker protection.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if self.get_state() == CircuitState::Open {
            let next_attempt = *self.next_attempt.read().await;
            if Instant::now() < next_attempt {
                return Err(CircuitBreakerError::Open {
                    name: self.config.name.clone(),
                    stats: self.get_stats().await,
                });
            }
            self.state.store(CircuitState::HalfOpen.code(), Ordering::Relaxed);
            self.consecutive_successes.store(0, Ordering::Relaxed);
        }

        if self.get_state() == CircuitState::HalfOpen {
            // half-open concurrency cap exceeded: treat as open
            let Ok(_permit) = self.half_open_permits.try_acquire() else {
                return Err(CircuitBreakerError::Open {
                    name: self.config.name.clone(),
                    stats: self.get_stats().await,
                });
            };

            let timeout = Duration::from_millis(self.config.timeout_ms);
            return match tokio::time::timeout(timeout, operation()).await {
                Ok(Ok(value)) => {
                    self.on_success().await;
                    Ok(value)
                }
                Ok(Err(_)) => {
                    self.on_failure().await;
                    Err(CircuitBreakerError::Open {
                        name: self.config.name.clone(),
                        stats: self.get_stats().await,
                    })
                }
                Err(_) => {
                    self.on_timeout().await;
                    Err(CircuitBreakerError::Timeout { name: self.config.name.clone() })
                }
            };
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(_)) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Open {
                    name: self.config.name.clone(),
                    stats: self.get_stats().await,
                })
            }
            Err(_) => {
                self.on_timeout().await;
                Err(CircuitBreakerError::Timeout { name: self.config.name.clone() })
            }
        }
    }

    async fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success.write().await = Some(SystemTime::now());

        if self.get_state() == CircuitState::HalfOpen {
            let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            if successes >= self.config.success_threshold {
                self.state.store(CircuitState::Closed.code(), Ordering::Relaxed);
                self.consecutive_successes.store(0, Ordering::Relaxed);
                self.rolling_failures.write().await.clear();
                info!(circuit = %self.config.name, "circuit breaker closed after recovery");
            }
        }
        self.persist().await;
    }

    async fn on_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.on_failure().await;
    }

    async fn on_failure(&self) {
        let now = Instant::now();
        *self.last_failure.write().await = Some(SystemTime::now());
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);

        let window = Duration::from_millis(self.config.rolling_window_ms);
        let rolling_count = {
            let mut failures = self.rolling_failures.write().await;
            failures.push_back(now);
            while let Some(front) = failures.front() {
                if now.duration_since(*front) > window {
                    failures.pop_front();
                } else {
                    break;
                }
            }
            failures.len()
        };

        if let Some(store) = &self.store {
            let at_ms = unix_millis_now();
            let _ = store.record_failure(&self.config.name, at_ms).await;
            let _ = store.prune_failures(&self.config.name, at_ms - self.config.rolling_window_ms as i64).await;
        }

        let should_open = self.get_state() == CircuitState::HalfOpen
            || rolling_count as u64 >= self.config.failure_threshold;

        if should_open {
            self.state.store(CircuitState::Open.code(), Ordering::Relaxed);
            let next_attempt = Instant::now() + Duration::from_millis(self.config.recovery_timeout_ms);
            *self.next_attempt.write().await = next_attempt;
            self.consecutive_successes.store(0, Ordering::Relaxed);
            warn!(circuit = %self.config.name, rolling_count, "circuit breaker opened");
        }
        self.persist().await;
    }

    async fn persist(&self) {
        if let Some(store) = &self.store {
            let stats = self.get_stats().await;
            let _ = store.save_state(&self.config.name, &stats).await;
        }
    }

    pub fn get_state(&self) -> CircuitState {
        CircuitState::from_code(self.state.load(Ordering::Relaxed))
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.get_state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            consecutive_successes: self.consecutive_successes.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rolling_failure_count: self.rolling_failures.read().await.len(),
            last_failure: *self.last_failure.read().await,
            last_success: *self.last_success.read().await,
        }
    }

    /// Manual reset, forces CLOSED with fresh metrics.
    pub async fn reset(&self) {
        self.state.store(CircuitState::Closed.code(), Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.rolling_failures.write().await.clear();
        *self.last_failure.write().await = None;
        *self.last_success.write().await = None;
        self.persist().await;
        info!(circuit = %self.config.name, "circuit breaker reset to closed");
    }
}

fn unix_millis_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.get_state())
            .field("consecutive_failures", &self.consecutive_failures.load(Ordering::Relaxed))
            .field("total_requests", &self.total_requests.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(failure_threshold: u64, success_threshold: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            name: "test-cb".to_string(),
            failure_threshold,
            success_threshold,
            timeout_ms: 1_000,
            rolling_window_ms: 60_000,
            recovery_timeout_ms: 50,
            max_concurrent_half_open: 1,
        }
    }

    #[tokio::test]
    async fn starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(cfg(2, 1));
        for _ in 0..2 {
            let _ = cb
                .call(|| async { Err::<(), &str>("boom") })
                .await;
        }
        assert_eq!(cb.get_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_without_invoking_while_open() {
        let cb = CircuitBreaker::new(cfg(1, 1));
        let _ = cb.call(|| async { Err::<(), &str>("boom") }).await;
        assert_eq!(cb.get_state(), CircuitState::Open);

        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked2 = invoked.clone();
        let result = cb
            .call(move || {
                invoked2.store(true, Ordering::SeqCst);
                async { Ok::<(), &str>(()) }
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closes_after_recovery_timeout_and_successes() {
        let cb = CircuitBreaker::new(cfg(1, 2));
        let _ = cb.call(|| async { Err::<(), &str>("boom") }).await;
        assert_eq!(cb.get_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let r1 = cb.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(r1.is_ok());
        assert_eq!(cb.get_state(), CircuitState::HalfOpen);

        let r2 = cb.call(|| async { Ok::<_, &str>(2) }).await;
        assert!(r2.is_ok());
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let cb = CircuitBreaker::new(cfg(1, 1));
        let _ = cb.call(|| async { Err::<(), &str>("boom") }).await;
        assert_eq!(cb.get_state(), CircuitState::Open);
        cb.reset().await;
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure_and_increments_timeouts() {
        let mut config = cfg(1, 1);
        config.timeout_ms = 10;
        let cb = CircuitBreaker::new(config);
        let result = cb
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Timeout { .. })));
        assert_eq!(cb.get_stats().await.timeouts, 1);
        assert_eq!(cb.get_state(), CircuitState::Open);
    }
}
