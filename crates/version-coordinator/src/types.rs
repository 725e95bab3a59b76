//! Version lifecycle and routing data model (§4.11).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiVersionStatus {
    Development,
    Stable,
    Deprecated,
    Sunset,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionCompatibilityLevel {
    Full,
    Backward,
    Breaking,
    MigrationRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiVersionInfo {
    pub version: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub status: ApiVersionStatus,
    pub release_date: DateTime<Utc>,
    pub deprecation_date: Option<DateTime<Utc>>,
    pub sunset_date: Option<DateTime<Utc>>,
    pub description: String,
    pub breaking_changes: Vec<String>,
    pub compatibility_matrix: HashMap<String, VersionCompatibilityLevel>,
    pub supported_roles: Vec<String>,
}

impl ApiVersionInfo {
    pub fn full_version(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn is_deprecated(&self) -> bool {
        matches!(self.status, ApiVersionStatus::Deprecated | ApiVersionStatus::Sunset | ApiVersionStatus::Archived)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ApiVersionStatus::Stable | ApiVersionStatus::Deprecated)
    }

    pub fn days_until_sunset(&self) -> Option<i64> {
        self.sunset_date.map(|sunset| (sunset - Utc::now()).num_days())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRoutingConfig {
    pub version: String,
    pub prefix: String,
    pub router_modules: HashMap<String, String>,
    pub middleware: Vec<String>,
    pub rate_limits: HashMap<String, u32>,
    pub deprecation_warnings: bool,
    pub migration_hints: HashMap<String, String>,
}

impl VersionRoutingConfig {
    pub fn new(version: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            prefix: prefix.into(),
            router_modules: HashMap::new(),
            middleware: Vec::new(),
            rate_limits: HashMap::new(),
            deprecation_warnings: false,
            migration_hints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationGuidance {
    pub from_version: String,
    pub to_version: String,
    pub compatibility_level: VersionCompatibilityLevel,
    pub breaking_changes: Vec<String>,
    pub migration_hints: HashMap<String, String>,
    pub estimated_effort: &'static str,
    pub immediate_action_required: bool,
    pub deadline: Option<DateTime<Utc>>,
}
