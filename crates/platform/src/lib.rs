//! Composition root (§9): builds every routing-fabric component from
//! [`AppConfig`] in dependency order and exposes the wired [`PlatformContext`].
//!
//! Dependency order follows §2/§9: C1 (event bus) → (C2 queues, C3 pub-sub,
//! C4 in-process router) → C5 (the same router, plugged with a shared-store
//! backend) → (C6 scaling, C7 circuit breakers, C8 health checks, all
//! alongside C5) → (C9 dead-letter handler, C10 error facade, C11 version
//! coordinator, all observing C1). There is no module-level global state
//! anywhere in this tree — every component lives on this struct instead,
//! replacing the source's module-singleton pattern per §9's REDESIGN FLAG.

pub mod adapters;
pub mod circuit_breakers;
pub mod lifecycle;
pub mod router_handle;

use anyhow::Context;
use mr_config::AppConfig;
use mr_dead_letter_handler::DeadLetterHandler;
use mr_error_facade::ErrorCoordinationFacade;
use mr_event_bus::EventBus;
use mr_pubsub_coordinator::PubSubCoordinator;
use mr_queue_manager::QueueManager;
use mr_resilience::HealthCheckManager;
use mr_scaling_coordinator::{ScalingCoordinator, ScalingPolicy};
use mr_shared_store::RedisStore;
use mr_version_coordinator::VersionCoordinator;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{RedisCircuitBreakerStore, RedisHealthStore};
use crate::circuit_breakers::CircuitBreakerRegistry;
use crate::lifecycle::LoggingInstanceLifecycle;
use crate::router_handle::RouterHandle;

/// Every live component of the routing fabric, wired from one [`AppConfig`].
/// Holding this behind an `Arc` is what an HTTP/gRPC edge (out of scope here,
/// see §3 Non-goals) would clone into its request handlers.
pub struct PlatformContext {
    pub config: AppConfig,
    pub shared_store: Arc<RedisStore>,
    pub event_bus: Arc<EventBus>,
    pub queue_manager: Arc<QueueManager>,
    pub pubsub: Arc<PubSubCoordinator>,
    pub router: RouterHandle,
    pub scaling: Option<Arc<ScalingCoordinator<RedisStore, LoggingInstanceLifecycle>>>,
    pub circuit_breakers: Arc<CircuitBreakerRegistry>,
    pub health: Arc<HealthCheckManager>,
    pub dead_letter: Arc<DeadLetterHandler>,
    pub error_facade: Arc<ErrorCoordinationFacade>,
    pub version_coordinator: Arc<VersionCoordinator>,
}

/// Builds every component in dependency order and returns the wired context.
///
/// The shared store is required unconditionally: C5/C6/C7/C8 all mirror
/// state through it, and `AppConfig::database.url` is itself required at
/// config-construction time (`REDIS_URL`), so there is no valid
/// configuration in which it is absent.
pub async fn build(config: AppConfig) -> anyhow::Result<Arc<PlatformContext>> {
    let shared_store = Arc::new(
        RedisStore::connect(&config.database.url)
            .await
            .context("connecting to the shared routing-fabric store")?,
    );

    // C1: every other component publishes system events through this bus.
    let event_bus = EventBus::new(mr_event_bus::EventBusConfig {
        max_retries: config.components.event_bus.max_retries,
        worker_pool_size: config.components.event_bus.worker_pool_size,
        maintenance_interval: Duration::from_secs(config.components.event_bus.maintenance_interval_seconds),
        health_report_interval: Duration::from_secs(config.components.event_bus.health_report_interval_seconds),
        completed_retention: Duration::from_secs(config.components.event_bus.completed_event_retention_hours * 3600),
    });

    // C2
    let queue_manager = QueueManager::new(mr_queue_manager::PersistenceConfig {
        enabled: config.components.queue_manager.persistence_enabled,
        directory: config.components.queue_manager.persistence_directory.clone(),
        interval: Duration::from_secs(config.components.queue_manager.persistence_interval_seconds),
    });

    // C3. `history_capacity_per_topic`, `ack_timeout_seconds` and
    // `max_backoff_seconds` describe per-topic/per-ack behavior the
    // coordinator tracks internally rather than as constructor config; only
    // `retry_backoff_factor` and `max_retries` are consumed here.
    let pubsub = PubSubCoordinator::new(mr_pubsub_coordinator::PubSubConfig {
        backoff_factor: config.components.pubsub.retry_backoff_factor,
        max_retries: config.components.pubsub.max_retries,
        retry_poll_interval: Duration::from_secs(5),
    });

    // C4 / C5. The in-process backend is for local/development use; any
    // non-development environment runs the shared-store backend so replicas
    // observe the same routing state (§4.5).
    let router_config = mr_message_router::RouterConfig {
        production_mode_strict: config.components.router.production_mode_strict,
        stale_after_seconds: config.components.router.stale_after_seconds as i64,
        unhealthy_after_seconds: config.components.router.unhealthy_after_seconds as i64,
        load_balance_reset_interval_seconds: config.components.router.load_balance_reset_interval_seconds,
    };
    let router = if config.app.environment == "development" {
        RouterHandle::in_memory(router_config, Some(event_bus.clone()))
    } else {
        RouterHandle::redis(shared_store.clone(), router_config, Some(event_bus.clone()))
    };
    router.install_default_rules().await.context("installing default routing rules")?;

    // C6: only meaningful once the router is distributed — a single
    // in-process router has nothing to scale.
    let scaling = if router.is_distributed() {
        let policy = match config.components.scaling.policy.as_str() {
            "manual" => ScalingPolicy::Manual,
            "cpu_based" => ScalingPolicy::CpuBased,
            "queue_based" => ScalingPolicy::QueueBased,
            "latency_based" => ScalingPolicy::LatencyBased,
            _ => ScalingPolicy::Hybrid,
        };
        let scaling_config = mr_scaling_coordinator::ScalingCoordinatorConfig {
            min_instances: config.components.scaling.min_instances as usize,
            max_instances: config.components.scaling.max_instances as usize,
            target_cpu: config.components.scaling.target_cpu,
            target_mps: config.components.scaling.target_mps,
            target_latency_ms: config.components.scaling.target_latency_ms,
            scale_up_threshold: config.components.scaling.scale_up_threshold,
            scale_down_threshold: config.components.scaling.scale_down_threshold,
            cooldown_seconds: config.components.scaling.cooldown_seconds as i64,
            policy,
        };
        let coordinator =
            ScalingCoordinator::new(scaling_config, shared_store.clone(), Arc::new(LoggingInstanceLifecycle))
                .await
                .context("starting the scaling coordinator")?;
        Some(coordinator)
    } else {
        None
    };

    // C7
    let circuit_breaker_store: Arc<dyn mr_resilience::CircuitBreakerStore> =
        RedisCircuitBreakerStore::new(shared_store.clone());
    let circuit_breakers =
        CircuitBreakerRegistry::new(config.components.circuit_breaker.clone(), Some(circuit_breaker_store));

    // C8
    let health_store = RedisHealthStore::new(shared_store.clone());
    let health = Arc::new(HealthCheckManager::with_store(health_store));
    health.start().await;

    // C9. `max_payload_bytes`/`max_nesting_depth`/`cleanup_interval_seconds`
    // are enforced by this crate as fixed constants (see `poison.rs`)
    // rather than taken as config; only the fields below are threaded
    // through.
    let dead_letter = DeadLetterHandler::new(
        mr_dead_letter_handler::DeadLetterConfig {
            poison_threshold: config.components.dead_letter.poison_threshold,
            recurrence_threshold: config.components.dead_letter.recurrence_threshold as usize,
            max_recovery_attempts: config.components.dead_letter.max_recovery_attempts,
            auto_recovery_confidence_threshold: config.components.dead_letter.auto_recovery_confidence,
            storage_root: config.components.dead_letter.archive_directory.to_string_lossy().into_owned(),
            retention_days: config.components.dead_letter.retention_days as i64,
        },
        Some(event_bus.clone()),
    );

    // C10
    let error_facade = ErrorCoordinationFacade::new(
        event_bus.clone(),
        mr_error_facade::ErrorFacadeConfig {
            integration_failure_threshold: config.components.error_facade.circuit_breaker_failure_threshold as u64,
            max_retry_attempts: 3,
        },
    );

    // C11. `latest_stable` is a runtime-mutable pointer this coordinator
    // tracks itself (`deprecate_version`/internal state); the config field
    // of the same name seeds nothing here and is effectively unused.
    let version_coordinator = Arc::new(VersionCoordinator::new(mr_version_coordinator::VersionCoordinatorConfig {
        brand: config.components.version_coordinator.brand.clone(),
        header_prefix: config.components.version_coordinator.header_prefix.clone(),
    }));

    Ok(Arc::new(PlatformContext {
        config,
        shared_store,
        event_bus,
        queue_manager,
        pubsub,
        router,
        scaling,
        circuit_breakers,
        health,
        dead_letter,
        error_facade,
        version_coordinator,
    }))
}

impl PlatformContext {
    /// Best-effort shutdown: stops every named queue's worker loop. None of
    /// the other components expose cooperative cancellation (their
    /// background tasks run for the lifetime of the process, per each
    /// crate's own constructor) — a full shutdown token would need to be
    /// threaded through every crate's internal loops, which is out of scope
    /// here.
    pub fn shutdown(&self) {
        for name in self.queue_manager.queue_names() {
            if let Ok(queue) = self.queue_manager.get_queue(&name) {
                queue.stop();
            }
        }
    }
}
