//! Authoritative key names for the shared store, per §6 of the routing
//! contract. Centralized here so every crate that mirrors state uses the
//! same prefix and doesn't hand-roll format strings.

pub const ROUTER_PREFIX: &str = "taxpoynt:message_router";
pub const CIRCUIT_BREAKER_PREFIX: &str = "taxpoynt:circuit_breaker";
pub const HEALTH_STATUS_KEY: &str = "taxpoynt:health_status";
pub const SCALING_PREFIX: &str = "taxpoynt:scaling_coordinator";

pub fn routing_rules() -> String {
    format!("{ROUTER_PREFIX}:routing_rules")
}

pub fn service_endpoints() -> String {
    format!("{ROUTER_PREFIX}:service_endpoints")
}

pub fn role_mappings() -> String {
    format!("{ROUTER_PREFIX}:role_mappings")
}

pub fn routing_table() -> String {
    format!("{ROUTER_PREFIX}:routing_table")
}

pub fn active_routes() -> String {
    format!("{ROUTER_PREFIX}:active_routes")
}

pub fn load_metrics() -> String {
    format!("{ROUTER_PREFIX}:load_metrics")
}

pub fn round_robin_state() -> String {
    format!("{ROUTER_PREFIX}:round_robin_state")
}

pub fn instance(instance_id: &str) -> String {
    format!("{ROUTER_PREFIX}:instances:{instance_id}")
}

pub fn stats(instance_id: &str) -> String {
    format!("{ROUTER_PREFIX}:stats:{instance_id}")
}

pub fn circuit_breaker_state(name: &str) -> String {
    format!("{CIRCUIT_BREAKER_PREFIX}:{name}:state")
}

pub fn circuit_breaker_failures(name: &str) -> String {
    format!("{CIRCUIT_BREAKER_PREFIX}:{name}:failures")
}

pub fn scaling_events() -> String {
    format!("{SCALING_PREFIX}:events")
}

pub fn scaling_metrics(instance_id: &str) -> String {
    format!("{SCALING_PREFIX}:metrics:{instance_id}")
}

pub fn scaling_coordinator() -> String {
    format!("{SCALING_PREFIX}:coordinator")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_authoritative_names() {
        assert_eq!(routing_rules(), "taxpoynt:message_router:routing_rules");
        assert_eq!(service_endpoints(), "taxpoynt:message_router:service_endpoints");
        assert_eq!(instance("abc"), "taxpoynt:message_router:instances:abc");
        assert_eq!(circuit_breaker_state("svc"), "taxpoynt:circuit_breaker:svc:state");
    }
}
