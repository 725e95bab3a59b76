//! Default routing rules installed at startup (§4.5). Any backend may
//! bootstrap with these; the shared-store variant is expected to call
//! this once per fresh cluster so every replica observes the same
//! starting rule set.

use crate::backend::RouterBackend;
use crate::router::Router;
use crate::types::{DeliveryStrategy, Role, RoutingRule};
use std::sync::Arc;

pub async fn install_default_rules<B: RouterBackend + 'static>(router: &Arc<Router<B>>) -> anyhow::Result<()> {
    let rules = vec![
        RoutingRule::new("api_gateway", "si_banking*", "*", None, Some(Role::Si), DeliveryStrategy::Priority, 90),
        RoutingRule::new("api_gateway", "si_*", "*", None, Some(Role::Si), DeliveryStrategy::LoadBalanced, 10),
        RoutingRule::new("si_*", "app_*", "*", Some(Role::Si), Some(Role::App), DeliveryStrategy::LoadBalanced, 20),
        RoutingRule::new("app_*", "si_*", "*", Some(Role::App), Some(Role::Si), DeliveryStrategy::Broadcast, 20),
        RoutingRule::new("*", "hybrid_coordinator", "*", None, Some(Role::HybridCoordinator), DeliveryStrategy::RoundRobin, 15),
        RoutingRule::new("*", "core_platform", "alert*", None, Some(Role::Core), DeliveryStrategy::Broadcast, 50),
    ];
    for rule in rules {
        router.add_routing_rule(rule).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::router::RouterConfig;

    #[tokio::test]
    async fn installs_six_default_rules() {
        let backend = InMemoryBackend::new();
        let router = Router::new(backend.clone(), RouterConfig::default(), None);
        install_default_rules(&router).await.unwrap();
        assert_eq!(backend.rules().await.unwrap().len(), 6);
    }
}
