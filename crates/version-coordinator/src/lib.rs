pub mod coordinator;
pub mod types;

pub use coordinator::{VersionCoordinator, VersionCoordinatorConfig, VersionCoordinatorError};
pub use types::{
    ApiVersionInfo, ApiVersionStatus, MigrationGuidance, VersionCompatibilityLevel, VersionRoutingConfig,
};
