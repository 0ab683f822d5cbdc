//! Pub/sub collaborator contract and the in-memory broadcast implementation.
//!
//! Every committed operation is published on its document's topic; streams
//! share one transport-level subscription per topic (see
//! [`crate::stream::SubscriptionHub`]). [`MemoryPubSub`] fans out inside the
//! process over tokio broadcast channels.

use async_trait::async_trait;
use dashmap::DashMap;
use tandem_engine::Operation;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure inside a pub/sub collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("pubsub: {0}")]
pub struct PubSubError(pub String);

/// Per-topic channel capacity. A subscriber lagging this far behind will
/// observe a stream gap and resynchronize, rather than stall the publisher.
const TOPIC_CAPACITY: usize = 256;

/// Topic-based broadcast of raw committed operations.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Broadcast a committed operation to every listener of the topic.
    async fn publish(&self, topic: &str, op: &Operation) -> std::result::Result<(), PubSubError>;

    /// Open a raw feed of the topic.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Operation>;
}

/// In-process pub/sub over tokio broadcast channels.
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    topics: DashMap<String, broadcast::Sender<Operation>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics currently held open (live channel, listeners or not).
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, op: &Operation) -> std::result::Result<(), PubSubError> {
        let live = match self.topics.get(topic) {
            Some(sender) => {
                // a send error only means every receiver is gone
                let _ = sender.send(op.clone());
                sender.receiver_count() > 0
            }
            None => false,
        };
        if !live {
            // drop channels nobody listens to anymore
            self.topics
                .remove_if(topic, |_, sender| sender.receiver_count() == 0);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Operation> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}
