//! Named durable message queues (§4.2): priority/FIFO/LIFO/delayed/batch
//! backing structures, consumer dispatch strategies, retry with
//! exponential backoff, dead-lettering, expiry, and optional
//! snapshot-to-disk persistence.

pub mod consumer;
pub mod manager;
pub mod message;
pub mod queue;

pub use consumer::{BatchConsumer, BatchOutcome, Consumer, ConsumeOutcome, DispatchStrategy};
pub use manager::{PersistenceConfig, QueueManager, QueueManagerError};
pub use message::{backoff_delay_seconds, MessageStatus, QueueType, QueuedMessage};
pub use queue::{MessageQueue, QueueConfig, QueueError};
