//! Centralized configuration management for the message routing fabric.
//!
//! Provides secure, validated configuration management with support for:
//! - Environment-based configuration
//! - Secrets management with encryption
//! - Configuration validation and hot-reloading
//! - Multi-environment support (dev, staging, production)

pub mod config;
pub mod environment;
pub mod loader;
pub mod secrets;
pub mod validation;

#[cfg(test)]
mod tests;

// Specific re-exports to avoid ambiguous glob re-exports
pub use config::{
    AppConfig, AppMetadata, ServerConfig, TlsConfig, DatabaseConfig,
    MonitoringConfig, RedisConfig, PrometheusConfig, StatsDConfig, ComponentConfigs,
    EventBusConfig, QueueManagerConfig, PubSubConfig, RouterConfig, RedisRouterConfig,
    ScalingConfig, CircuitBreakerDefaults, HealthCheckerDefaults, DeadLetterConfig,
    ErrorFacadeConfig, VersionCoordinatorConfig,
};
pub use environment::{detection, presets, Environment, EnvironmentConfig, EnvironmentManager};
pub use loader::{ConfigLoader, ConfigWatcher, ConfigSource, ConfigLoadResult, ConfigLoaderBuilder, MergeStrategy};
pub use secrets::{SecretMetadata, SecretValue, SecretsManager};
pub use validation::{validate_config, ConfigValidator, DatabaseConfigValidation, ValidationError, ValidationResult};

pub use anyhow::Result;
/// Re-export commonly used types
pub use serde::{Deserialize, Serialize};
