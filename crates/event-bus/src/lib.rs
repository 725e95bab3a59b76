//! In-process, priority-aware event bus (§4.1). Provides the `Event` data
//! model, pattern matching shared with the pub-sub coordinator, and the
//! `EventBus` dispatcher that every routing-fabric component publishes
//! system events through.

pub mod bus;
pub mod event;
pub mod patterns;

pub use bus::{EventBus, EventBusConfig, EventBusError, EventHandler, EventStatus, FnHandler, Result, Subscription};
pub use event::{Event, EventPriority, EventScope};
pub use patterns::{dotted_match, glob_match, type_pattern_matches};
