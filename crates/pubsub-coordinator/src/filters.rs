//! Publication filters (§4.3): built-ins plus a fallback that treats an
//! unrecognized filter name as a direct equality check against the
//! publication's payload or headers.

use crate::types::{FilterSpec, Publication};
use chrono::{DateTime, Utc};

pub fn passes_all(filters: &[FilterSpec], publication: &Publication) -> bool {
    filters.iter().all(|f| passes(f, publication))
}

fn passes(filter: &FilterSpec, publication: &Publication) -> bool {
    match filter.name.as_str() {
        "tenant_filter" => tenant_filter(filter, publication),
        "priority_filter" => priority_filter(filter, publication),
        "time_filter" => time_filter(filter, publication),
        _ => generic_equality_filter(filter, publication),
    }
}

fn tenant_filter(filter: &FilterSpec, publication: &Publication) -> bool {
    match filter.params.get("tenant_id") {
        Some(expected) => publication
            .tenant_id
            .as_deref()
            .map(|t| expected.as_str() == Some(t))
            .unwrap_or(false),
        None => true,
    }
}

fn priority_filter(filter: &FilterSpec, publication: &Publication) -> bool {
    match filter.params.get("min_priority").and_then(|v| v.as_i64()) {
        Some(min) => publication.priority as i64 >= min,
        None => true,
    }
}

fn time_filter(filter: &FilterSpec, publication: &Publication) -> bool {
    let now = publication.created_at;
    let after_ok = filter
        .params
        .get("after")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| now >= t.with_timezone(&Utc))
        .unwrap_or(true);
    let before_ok = filter
        .params
        .get("before")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| now <= t.with_timezone(&Utc))
        .unwrap_or(true);
    after_ok && before_ok
}

fn generic_equality_filter(filter: &FilterSpec, publication: &Publication) -> bool {
    let Some(expected) = filter.params.get("equals") else {
        return true;
    };
    let from_payload = publication.payload.get(&filter.name);
    let from_headers = publication.headers.get(&filter.name);
    from_payload == Some(expected) || from_headers == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn publication(tenant_id: Option<&str>, priority: i32) -> Publication {
        Publication {
            id: "p1".to_string(),
            topic: "t".to_string(),
            payload: serde_json::json!({}),
            publisher: "svc".to_string(),
            priority,
            delivery_guarantee: crate::types::DeliveryGuarantee::AtMostOnce,
            expiry: None,
            correlation_id: None,
            tenant_id: tenant_id.map(|s| s.to_string()),
            headers: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tenant_filter_requires_matching_tenant() {
        let filter = FilterSpec { name: "tenant_filter".to_string(), params: HashMap::from([("tenant_id".to_string(), serde_json::json!("acme"))]) };
        assert!(passes(&filter, &publication(Some("acme"), 0)));
        assert!(!passes(&filter, &publication(Some("other"), 0)));
        assert!(!passes(&filter, &publication(None, 0)));
    }

    #[test]
    fn priority_filter_enforces_minimum() {
        let filter = FilterSpec { name: "priority_filter".to_string(), params: HashMap::from([("min_priority".to_string(), serde_json::json!(5))]) };
        assert!(passes(&filter, &publication(None, 5)));
        assert!(!passes(&filter, &publication(None, 4)));
    }

    #[test]
    fn unknown_filter_falls_back_to_equality_on_payload() {
        let mut pub_ = publication(None, 0);
        pub_.payload = serde_json::json!({"region": "eu"});
        let filter = FilterSpec { name: "region".to_string(), params: HashMap::from([("equals".to_string(), serde_json::json!("eu"))]) };
        assert!(passes(&filter, &pub_));
        let filter_mismatch = FilterSpec { name: "region".to_string(), params: HashMap::from([("equals".to_string(), serde_json::json!("us"))]) };
        assert!(!passes(&filter_mismatch, &pub_));
    }
}
