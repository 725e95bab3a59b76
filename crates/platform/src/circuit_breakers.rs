//! Per-target circuit breaker registry (§4.7/§6). One [`CircuitBreaker`]
//! guards one named target (an endpoint id, a downstream host, …); this
//! registry lazily creates them from the configured defaults and mirrors
//! every one to the shared store through [`crate::adapters::RedisCircuitBreakerStore`].

use dashmap::DashMap;
use mr_config::CircuitBreakerDefaults;
use mr_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStore};
use std::sync::Arc;

pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerDefaults,
    store: Option<Arc<dyn CircuitBreakerStore>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerDefaults, store: Option<Arc<dyn CircuitBreakerStore>>) -> Arc<Self> {
        Arc::new(Self { defaults, store, breakers: DashMap::new() })
    }

    /// Returns the breaker for `name`, creating it from the configured
    /// defaults on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        let config = CircuitBreakerConfig {
            name: name.to_string(),
            failure_threshold: self.defaults.failure_threshold,
            success_threshold: self.defaults.success_threshold,
            timeout_ms: self.defaults.timeout_seconds * 1000,
            rolling_window_ms: self.defaults.rolling_window_seconds * 1000,
            recovery_timeout_ms: self.defaults.recovery_timeout_seconds * 1000,
            max_concurrent_half_open: self.defaults.max_concurrent_half_open,
        };
        let breaker = Arc::new(CircuitBreaker::with_store(config, self.store.clone()));
        self.breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_breaker_for_same_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerDefaults::default(), None);
        let a = registry.get_or_create("svc-a");
        let b = registry.get_or_create("svc-a");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["svc-a".to_string()]);
    }
}
