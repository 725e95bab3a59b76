//! [`VersionCoordinator`] (§4.11): the boundary that decides which API
//! version a request belongs to and whether the caller's role may use it.
//! It never touches the routing fabric itself — it only produces the
//! `(role, operation)` context the router downstream consumes.

use crate::types::{
    ApiVersionInfo, ApiVersionStatus, MigrationGuidance, VersionCompatibilityLevel, VersionRoutingConfig,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

static PATH_VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/api/(v\d+)").unwrap());

#[derive(Debug, Error)]
pub enum VersionCoordinatorError {
    #[error("unknown API version: {0}")]
    UnknownVersion(String),
    #[error("role {role} is not permitted to use API version {version}")]
    AccessDenied { role: String, version: String },
}

pub struct VersionCoordinatorConfig {
    pub brand: String,
    pub header_prefix: String,
}

impl Default for VersionCoordinatorConfig {
    fn default() -> Self {
        Self { brand: "taxpoynt".to_string(), header_prefix: "API-Version".to_string() }
    }
}

pub struct VersionCoordinator {
    config: VersionCoordinatorConfig,
    versions: DashMap<String, ApiVersionInfo>,
    routing_configs: DashMap<String, VersionRoutingConfig>,
    default_version: String,
    latest_stable: RwLock<String>,
    accept_header_re: Regex,
}

impl VersionCoordinator {
    pub fn new(config: VersionCoordinatorConfig) -> Self {
        let accept_header_re =
            Regex::new(&format!(r"application/vnd\.{}\.(v\d+)\+json", regex::escape(&config.brand))).unwrap();
        let coordinator = Self {
            default_version: "v1".to_string(),
            latest_stable: RwLock::new("v1".to_string()),
            versions: DashMap::new(),
            routing_configs: DashMap::new(),
            accept_header_re,
            config,
        };
        coordinator.register_default_versions();
        info!("version coordinator initialized");
        coordinator
    }

    fn register_default_versions(&self) {
        let roles = vec!["system_integrator".to_string(), "access_point_provider".to_string(), "administrator".to_string()];

        let v1_info = ApiVersionInfo {
            version: "v1".to_string(),
            major: 1,
            minor: 0,
            patch: 0,
            status: ApiVersionStatus::Stable,
            release_date: DateTime::parse_from_rfc3339("2024-12-31T00:00:00Z").unwrap().with_timezone(&Utc),
            deprecation_date: None,
            sunset_date: None,
            description: "Initial stable release of the e-invoicing platform API".to_string(),
            breaking_changes: Vec::new(),
            compatibility_matrix: HashMap::from([("v2".to_string(), VersionCompatibilityLevel::MigrationRequired)]),
            supported_roles: roles.clone(),
        };
        let mut v1_routing = VersionRoutingConfig::new("v1", "/api/v1");
        v1_routing.rate_limits = HashMap::from([
            ("system_integrator".to_string(), 1000),
            ("access_point_provider".to_string(), 2000),
            ("administrator".to_string(), 5000),
        ]);

        let v2_info = ApiVersionInfo {
            version: "v2".to_string(),
            major: 2,
            minor: 0,
            patch: 0,
            status: ApiVersionStatus::Development,
            release_date: DateTime::parse_from_rfc3339("2025-06-30T00:00:00Z").unwrap().with_timezone(&Utc),
            deprecation_date: None,
            sunset_date: None,
            description: "Enhanced API with improved performance and new features".to_string(),
            breaking_changes: vec![
                "Updated authentication flow".to_string(),
                "Modified response format for transaction endpoints".to_string(),
                "New required fields for organization creation".to_string(),
            ],
            compatibility_matrix: HashMap::from([("v1".to_string(), VersionCompatibilityLevel::Breaking)]),
            supported_roles: roles,
        };
        let mut v2_routing = VersionRoutingConfig::new("v2", "/api/v2");
        v2_routing.rate_limits = HashMap::from([
            ("system_integrator".to_string(), 2000),
            ("access_point_provider".to_string(), 4000),
            ("administrator".to_string(), 10000),
        ]);
        v2_routing.migration_hints = HashMap::from([
            ("authentication".to_string(), "Use new JWT format with role claims".to_string()),
            ("transactions".to_string(), "Response now includes detailed compliance metadata".to_string()),
            ("organizations".to_string(), "Additional validation required for new fields".to_string()),
        ]);

        self.register_version(v1_info, v1_routing);
        self.register_version(v2_info, v2_routing);
    }

    /// Registers (or replaces) a version, promoting it to `latest_stable`
    /// when it is STABLE and its major is not older than the current one.
    pub fn register_version(&self, info: ApiVersionInfo, routing: VersionRoutingConfig) {
        let version = info.version.clone();
        let status = info.status;
        let major = info.major;

        let should_promote = status == ApiVersionStatus::Stable
            && self.versions.get(&*self.latest_stable.read()).map(|v| major >= v.major).unwrap_or(true);

        self.versions.insert(version.clone(), info);
        self.routing_configs.insert(version.clone(), routing);

        if should_promote {
            *self.latest_stable.write() = version.clone();
        }
        info!(version = %version, status = ?status, "registered API version");
    }

    pub fn get_version_info(&self, version: &str) -> Result<ApiVersionInfo, VersionCoordinatorError> {
        self.versions.get(version).map(|v| v.clone()).ok_or_else(|| VersionCoordinatorError::UnknownVersion(version.to_string()))
    }

    pub fn get_routing_config(&self, version: &str) -> Result<VersionRoutingConfig, VersionCoordinatorError> {
        self.routing_configs
            .get(version)
            .map(|v| v.clone())
            .ok_or_else(|| VersionCoordinatorError::UnknownVersion(version.to_string()))
    }

    pub fn latest_stable(&self) -> String {
        self.latest_stable.read().clone()
    }

    /// Detects the requested API version: path prefix, then content-
    /// negotiation `Accept` header, then an explicit `API-Version` header,
    /// falling back to latest stable (§4.11).
    pub fn detect_version_from_request(
        &self,
        path: &str,
        accept_header: Option<&str>,
        api_version_header: Option<&str>,
    ) -> String {
        if let Some(caps) = PATH_VERSION_RE.captures(path) {
            let version = &caps[1];
            if self.versions.contains_key(version) {
                return version.to_string();
            }
        }

        if let Some(accept) = accept_header {
            if let Some(caps) = self.accept_header_re.captures(accept) {
                let version = &caps[1];
                if self.versions.contains_key(version) {
                    return version.to_string();
                }
            }
        }

        if let Some(header_version) = api_version_header {
            if self.versions.contains_key(header_version) {
                return header_version.to_string();
            }
        }

        self.latest_stable()
    }

    pub fn validate_version_access(&self, version: &str, role: &str) -> Result<bool, VersionCoordinatorError> {
        let info = self.get_version_info(version)?;
        if !info.is_active() {
            return Ok(false);
        }
        Ok(info.supported_roles.iter().any(|r| r == role))
    }

    pub fn check_compatibility(&self, from_version: &str, to_version: &str) -> Result<VersionCompatibilityLevel, VersionCoordinatorError> {
        let from_info = self.get_version_info(from_version)?;
        if let Some(level) = from_info.compatibility_matrix.get(to_version) {
            return Ok(*level);
        }
        let to_info = self.get_version_info(to_version)?;
        Ok(if from_info.major == to_info.major {
            if from_info.minor == to_info.minor { VersionCompatibilityLevel::Full } else { VersionCompatibilityLevel::Backward }
        } else {
            VersionCompatibilityLevel::Breaking
        })
    }

    pub fn get_migration_guidance(&self, from_version: &str, to_version: &str) -> Result<MigrationGuidance, VersionCoordinatorError> {
        let from_info = self.get_version_info(from_version)?;
        let to_info = self.get_version_info(to_version)?;
        let to_config = self.get_routing_config(to_version)?;
        let compatibility_level = self.check_compatibility(from_version, to_version)?;

        let estimated_effort = match compatibility_level {
            VersionCompatibilityLevel::Full => "minimal",
            VersionCompatibilityLevel::Backward => "low",
            VersionCompatibilityLevel::Breaking => "medium",
            VersionCompatibilityLevel::MigrationRequired => "high",
        };

        let (immediate_action_required, deadline) = if from_info.is_deprecated() {
            (true, from_info.sunset_date)
        } else {
            (false, None)
        };

        Ok(MigrationGuidance {
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            compatibility_level,
            breaking_changes: to_info.breaking_changes,
            migration_hints: to_config.migration_hints,
            estimated_effort,
            immediate_action_required,
            deadline,
        })
    }

    /// Builds the response headers a caller should attach for `version`,
    /// mirroring `add_version_headers` (§4.11): base URL is supplied by the
    /// caller so this stays transport-framework agnostic.
    pub fn version_headers(&self, version: &str, base_url: &str) -> Result<HashMap<String, String>, VersionCoordinatorError> {
        let info = self.get_version_info(version)?;
        let mut headers = HashMap::new();
        headers.insert(self.config.header_prefix.clone(), version.to_string());
        headers.insert(format!("{}-Full", self.config.header_prefix), info.full_version());
        headers.insert(format!("{}-Status", self.config.header_prefix), format!("{:?}", info.status).to_lowercase());

        if info.is_deprecated() {
            headers.insert("Deprecation".to_string(), "true".to_string());
            if let Some(sunset) = info.sunset_date {
                headers.insert("Sunset".to_string(), sunset.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
            }
        }

        let latest = self.latest_stable();
        if version != latest {
            if let Ok(latest_info) = self.get_version_info(&latest) {
                headers.insert("API-Latest-Version".to_string(), latest.clone());
                headers.insert("API-Latest-Version-Full".to_string(), latest_info.full_version());
            }
            if info.is_deprecated() {
                headers.insert(
                    "API-Migration-Guide".to_string(),
                    format!("{}/api/{}/migration/from/{}", base_url.trim_end_matches('/'), latest, version),
                );
            }
        }

        Ok(headers)
    }

    pub fn list_active_versions(&self) -> Vec<String> {
        self.versions
            .iter()
            .filter(|e| e.status != ApiVersionStatus::Archived)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn get_rate_limit(&self, version: &str, role: &str) -> u32 {
        self.routing_configs
            .get(version)
            .and_then(|c| c.rate_limits.get(role).copied())
            .unwrap_or(1000)
    }

    /// Marks `version` deprecated; sunsets 365 days out unless `sunset_date`
    /// is supplied.
    pub fn deprecate_version(&self, version: &str, sunset_date: Option<DateTime<Utc>>) -> Result<(), VersionCoordinatorError> {
        let mut entry = self.versions.get_mut(version).ok_or_else(|| VersionCoordinatorError::UnknownVersion(version.to_string()))?;
        let now = Utc::now();
        entry.status = ApiVersionStatus::Deprecated;
        entry.deprecation_date = Some(now);
        entry.sunset_date = Some(sunset_date.unwrap_or(now + Duration::days(365)));
        if let Some(mut routing) = self.routing_configs.get_mut(version) {
            routing.deprecation_warnings = true;
        }
        warn!(version = %version, sunset = ?entry.sunset_date, "API version deprecated");
        Ok(())
    }

    pub fn get_version_summary(&self) -> serde_json::Value {
        let available: HashMap<String, serde_json::Value> = self
            .versions
            .iter()
            .map(|e| {
                let info = e.value();
                (
                    info.version.clone(),
                    serde_json::json!({
                        "status": format!("{:?}", info.status).to_lowercase(),
                        "full_version": info.full_version(),
                        "description": info.description,
                        "is_deprecated": info.is_deprecated(),
                        "supported_roles": info.supported_roles,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "current_stable": self.latest_stable(),
            "default_version": self.default_version,
            "available_versions": available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_version_from_path_before_headers() {
        let coordinator = VersionCoordinator::new(VersionCoordinatorConfig::default());
        assert_eq!(coordinator.detect_version_from_request("/api/v2/organizations", None, None), "v2");
    }

    #[test]
    fn falls_back_to_latest_stable() {
        let coordinator = VersionCoordinator::new(VersionCoordinatorConfig::default());
        assert_eq!(coordinator.detect_version_from_request("/health", None, None), "v1");
    }

    #[test]
    fn detects_version_from_accept_header() {
        let coordinator = VersionCoordinator::new(VersionCoordinatorConfig::default());
        let version = coordinator.detect_version_from_request("/status", Some("application/vnd.taxpoynt.v2+json"), None);
        assert_eq!(version, "v2");
    }

    #[test]
    fn development_version_fails_access_check() {
        let coordinator = VersionCoordinator::new(VersionCoordinatorConfig::default());
        assert!(!coordinator.validate_version_access("v2", "system_integrator").unwrap());
        assert!(coordinator.validate_version_access("v1", "system_integrator").unwrap());
    }

    #[test]
    fn deprecating_v1_sets_sunset_and_headers() {
        let coordinator = VersionCoordinator::new(VersionCoordinatorConfig::default());
        coordinator.deprecate_version("v1", None).unwrap();
        let headers = coordinator.version_headers("v1", "https://api.example.com").unwrap();
        assert_eq!(headers.get("Deprecation").unwrap(), "true");
        assert!(headers.contains_key("Sunset"));
    }

    #[test]
    fn compatibility_falls_back_to_major_minor_comparison_when_unmapped() {
        let coordinator = VersionCoordinator::new(VersionCoordinatorConfig::default());
        coordinator.register_version(
            ApiVersionInfo {
                version: "v1.1".to_string(),
                major: 1,
                minor: 1,
                patch: 0,
                status: ApiVersionStatus::Stable,
                release_date: Utc::now(),
                deprecation_date: None,
                sunset_date: None,
                description: String::new(),
                breaking_changes: Vec::new(),
                compatibility_matrix: HashMap::new(),
                supported_roles: vec!["administrator".to_string()],
            },
            VersionRoutingConfig::new("v1.1", "/api/v1.1"),
        );
        let level = coordinator.check_compatibility("v1", "v1.1").unwrap();
        assert!(matches!(level, VersionCompatibilityLevel::Backward));
    }
}
