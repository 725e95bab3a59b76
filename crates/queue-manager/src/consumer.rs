//! Consumer registration and per-queue worker dispatch strategy (§4.2).

use crate::message::QueuedMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome a consumer reports for a processed message.
#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    Ack,
    Nack(String),
}

#[async_trait]
pub trait Consumer: Send + Sync {
    async fn consume(&self, message: &QueuedMessage) -> anyhow::Result<ConsumeOutcome>;
}

/// Batch variant: invoked once per accumulated batch; a returned vector
/// must match the batch length and is applied per-item, a single `Ack`/
/// `Nack` in the vector's place applies the same outcome to every item.
#[async_trait]
pub trait BatchConsumer: Send + Sync {
    async fn consume_batch(&self, messages: &[QueuedMessage]) -> anyhow::Result<BatchOutcome>;
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    All(ConsumeOutcome),
    PerItem(Vec<ConsumeOutcome>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    SingleConsumer,
    RoundRobin,
    LoadBalanced,
    WorkStealing,
}

pub struct RegisteredConsumer {
    pub id: String,
    pub consumer: std::sync::Arc<dyn Consumer>,
    pub in_flight: AtomicUsize,
}

/// Picks the next consumer to hand a ready message to, per the queue's
/// configured [`DispatchStrategy`]. `WORK_STEALING` and `LOAD_BALANCED`
/// both route to the least-busy consumer; they differ only in that
/// work-stealing additionally lets an idle consumer pull from a queue
/// that has no consumer registered to it directly, which at this layer
/// collapses to the same "least `in_flight`" choice.
pub fn select_consumer<'a>(
    strategy: DispatchStrategy,
    consumers: &'a [std::sync::Arc<RegisteredConsumer>],
    round_robin_cursor: &AtomicUsize,
) -> Option<&'a std::sync::Arc<RegisteredConsumer>> {
    if consumers.is_empty() {
        return None;
    }
    match strategy {
        DispatchStrategy::SingleConsumer => consumers.first(),
        DispatchStrategy::RoundRobin => {
            let idx = round_robin_cursor.fetch_add(1, Ordering::Relaxed) % consumers.len();
            consumers.get(idx)
        }
        DispatchStrategy::LoadBalanced | DispatchStrategy::WorkStealing => consumers
            .iter()
            .min_by_key(|c| c.in_flight.load(Ordering::Relaxed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NoopConsumer;

    #[async_trait]
    impl Consumer for NoopConsumer {
        async fn consume(&self, _message: &QueuedMessage) -> anyhow::Result<ConsumeOutcome> {
            Ok(ConsumeOutcome::Ack)
        }
    }

    fn consumer(id: &str, in_flight: usize) -> Arc<RegisteredConsumer> {
        Arc::new(RegisteredConsumer {
            id: id.to_string(),
            consumer: Arc::new(NoopConsumer),
            in_flight: AtomicUsize::new(in_flight),
        })
    }

    #[test]
    fn round_robin_cycles_through_consumers() {
        let consumers = vec![consumer("a", 0), consumer("b", 0), consumer("c", 0)];
        let cursor = AtomicUsize::new(0);
        let picks: Vec<String> = (0..4)
            .map(|_| select_consumer(DispatchStrategy::RoundRobin, &consumers, &cursor).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn load_balanced_picks_least_busy() {
        let consumers = vec![consumer("a", 5), consumer("b", 1), consumer("c", 3)];
        let cursor = AtomicUsize::new(0);
        let pick = select_consumer(DispatchStrategy::LoadBalanced, &consumers, &cursor).unwrap();
        assert_eq!(pick.id, "b");
    }
}
