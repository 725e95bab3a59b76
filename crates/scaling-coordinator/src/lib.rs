//! Horizontal scaling coordinator (§4.6): tracks a pool of router instances,
//! collects their stats into the shared store, evaluates instance health,
//! and scales the pool up or down against configurable thresholds.

pub mod coordinator;
pub mod types;

pub use coordinator::{InstanceLifecycle, ScalingCoordinator, ScalingError};
pub use types::{
    scaling_decision_factor, ScalingAction, ScalingCoordinatorConfig, ScalingEvent, ScalingInstanceMetrics,
    ScalingPolicy,
};
