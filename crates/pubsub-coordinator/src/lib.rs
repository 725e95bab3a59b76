//! Topic/subscription pub-sub coordination (§4.3): pattern-matched
//! dispatch, built-in filters and transforms, and at-most/at-least-once
//! delivery guarantees with backoff retry.

pub mod coordinator;
pub mod filters;
pub mod transforms;
pub mod types;

pub use coordinator::{PubSubConfig, PubSubCoordinator, PubSubError};
pub use types::{
    DeliveryGuarantee, DispatchMode, FilterSpec, Publication, Subscription, SubscriptionHandler,
    Topic, TransformSpec,
};
