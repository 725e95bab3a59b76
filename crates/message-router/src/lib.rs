//! Role-based message routing (§4.4/§4.5): rule-driven dispatch across
//! five delivery strategies, against either an in-process endpoint table
//! (C4) or one mirrored to a shared key-value store (C5), through the
//! single [`router::Router`] implementation plugged with a
//! [`backend::RouterBackend`].

pub mod backend;
pub mod default_rules;
pub mod dev_fallback;
pub mod router;
pub mod types;

pub use backend::{InMemoryBackend, RedisBackend, RouterBackend, RouterError};
pub use default_rules::install_default_rules;
pub use dev_fallback::DevFallbackRouter;
pub use router::{Router, RouterConfig};
pub use types::{
    infer_message_type, ActiveRoute, DeliveryContext, DeliveryStrategy, Deliverable, EndpointHealth,
    MessageType, Role, RoutedMessage, RoutingRule, ServiceEndpoint,
};
