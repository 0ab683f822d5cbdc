//! Async operation streams and the shared subscription hub.
//!
//! An [`OpStream`] hands a consumer one document's committed operations in
//! strict version order with no gaps and no duplicates. The ordering logic
//! itself is the engine's [`StreamState`]; this module adds the async
//! plumbing: the live listener whose queue buffers the window between
//! listener registration and history fetch, and the reference-counted
//! sharing of transport subscriptions across streams of the same topic.

use crate::error::{AppError, Result};
use crate::pubsub::PubSub;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_engine::{Operation, StreamState, Version};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Fans one transport-level topic subscription out to any number of
/// streams. The first listener on a topic opens the transport subscription;
/// the last detach closes it.
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    pubsub: Arc<dyn PubSub>,
    topics: DashMap<String, TopicEntry>,
    next_listener: AtomicU64,
}

struct TopicEntry {
    listeners: HashMap<u64, mpsc::UnboundedSender<Operation>>,
    relay: JoinHandle<()>,
}

/// One registered listener: a private queue fed by the topic relay.
pub struct StreamListener {
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Operation>,
    hub: SubscriptionHub,
}

impl SubscriptionHub {
    pub fn new(pubsub: Arc<dyn PubSub>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                pubsub,
                topics: DashMap::new(),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Topics with a live transport subscription.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Register a listener on a topic.
    ///
    /// The listener's queue starts filling immediately, which is what makes
    /// "register the listener, then fetch history" race-free: anything
    /// committed during the fetch waits in the queue.
    pub fn attach(&self, topic: &str) -> StreamListener {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut entry = self
            .inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                let feed = self.inner.pubsub.subscribe(topic);
                let relay = tokio::spawn(Self::relay(
                    Arc::clone(&self.inner),
                    topic.to_string(),
                    feed,
                ));
                TopicEntry {
                    listeners: HashMap::new(),
                    relay,
                }
            });
        entry.listeners.insert(id, tx);
        drop(entry);

        StreamListener {
            topic: topic.to_string(),
            id,
            rx,
            hub: self.clone(),
        }
    }

    async fn relay(
        inner: Arc<HubInner>,
        topic: String,
        mut feed: broadcast::Receiver<Operation>,
    ) {
        loop {
            match feed.recv().await {
                Ok(op) => {
                    let Some(entry) = inner.topics.get(&topic) else {
                        break;
                    };
                    for tx in entry.listeners.values() {
                        let _ = tx.send(op.clone());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // consumers will hit the gap and resynchronize loudly
                    tracing::warn!(topic = %topic, skipped, "subscription feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Remove a listener; tears the transport subscription down with the
    /// last one.
    fn detach(&self, topic: &str, id: u64) {
        let emptied = match self.inner.topics.get_mut(topic) {
            Some(mut entry) => {
                entry.listeners.remove(&id);
                entry.listeners.is_empty()
            }
            None => false,
        };
        if emptied {
            if let Some((_, entry)) = self
                .inner
                .topics
                .remove_if(topic, |_, entry| entry.listeners.is_empty())
            {
                entry.relay.abort();
                tracing::debug!(topic = %topic, "topic subscription closed");
            }
        }
    }
}

/// An ordered, gap-free feed of one document's committed operations.
///
/// Construction packs the catch-up history (validating contiguity); after
/// that, [`next`](OpStream::next) is pure pass-through. A detected gap
/// poisons the stream: the error is yielded once and the subscription is
/// released, forcing the consumer back through a fresh fetch.
pub struct OpStream {
    collection: String,
    id: String,
    state: StreamState,
    ready: VecDeque<Operation>,
    listener: Option<StreamListener>,
}

impl OpStream {
    pub(crate) fn open(
        collection: &str,
        id: &str,
        from: Version,
        history: Vec<Operation>,
        listener: StreamListener,
    ) -> tandem_engine::Result<Self> {
        let mut state = StreamState::new(from);
        let ready: VecDeque<Operation> = state.pack(history)?.into();
        Ok(Self {
            collection: collection.to_string(),
            id: id.to_string(),
            state,
            ready,
            listener: Some(listener),
        })
    }

    /// Next operation in strict version order.
    ///
    /// `None` after [`destroy`](OpStream::destroy) or once the feed closes.
    pub async fn next(&mut self) -> Option<Result<Operation>> {
        if let Some(op) = self.ready.pop_front() {
            return Some(Ok(op));
        }
        loop {
            let listener = self.listener.as_mut()?;
            let op = listener.rx.recv().await?;
            match self.state.classify(op) {
                Ok(Some(op)) => return Some(Ok(op)),
                Ok(None) => continue, // duplicate from the catch-up window
                Err(err) => {
                    tracing::warn!(
                        collection = %self.collection,
                        id = %self.id,
                        %err,
                        "operation stream poisoned"
                    );
                    self.destroy();
                    return Some(Err(AppError::Engine(err)));
                }
            }
        }
    }

    /// Release the subscription. Synchronous and idempotent; shared topic
    /// subscriptions are reference-counted underneath.
    pub fn destroy(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.hub.detach(&listener.topic, listener.id);
        }
    }
}

impl Drop for OpStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryPubSub;
    use serde_json::json;

    fn op(version: u64) -> Operation {
        Operation::edit("w", version + 1, Some(version), json!([]))
    }

    #[tokio::test]
    async fn hub_shares_one_topic_subscription() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let hub = SubscriptionHub::new(Arc::clone(&pubsub) as Arc<dyn PubSub>);

        let mut first = hub.attach("notes/n1");
        let mut second = hub.attach("notes/n1");
        assert_eq!(hub.topic_count(), 1);

        pubsub.publish("notes/n1", &op(0)).await.unwrap();
        assert_eq!(first.rx.recv().await.unwrap().version, Some(0));
        assert_eq!(second.rx.recv().await.unwrap().version, Some(0));

        let (topic, id) = (first.topic.clone(), first.id);
        hub.detach(&topic, id);
        assert_eq!(hub.topic_count(), 1);

        let (topic, id) = (second.topic.clone(), second.id);
        hub.detach(&topic, id);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn stream_yields_history_then_live() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let hub = SubscriptionHub::new(Arc::clone(&pubsub) as Arc<dyn PubSub>);

        let listener = hub.attach("notes/n1");
        let history = vec![op(0), op(1)];
        let mut stream = OpStream::open("notes", "n1", 0, history, listener).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(0));
        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(1));

        pubsub.publish("notes/n1", &op(2)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(2));
    }

    #[tokio::test]
    async fn stream_skips_duplicates_from_the_race_window() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let hub = SubscriptionHub::new(Arc::clone(&pubsub) as Arc<dyn PubSub>);

        let listener = hub.attach("notes/n1");
        // ops 0 and 1 land in the listener queue while "history is fetched"
        pubsub.publish("notes/n1", &op(0)).await.unwrap();
        pubsub.publish("notes/n1", &op(1)).await.unwrap();

        let history = vec![op(0), op(1)];
        let mut stream = OpStream::open("notes", "n1", 0, history, listener).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(0));
        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(1));

        // the buffered duplicates are dropped; the next fresh op flows
        pubsub.publish("notes/n1", &op(2)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(2));
    }

    #[tokio::test]
    async fn gap_poisons_the_stream() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let hub = SubscriptionHub::new(Arc::clone(&pubsub) as Arc<dyn PubSub>);

        let listener = hub.attach("notes/n1");
        let mut stream = OpStream::open("notes", "n1", 0, Vec::new(), listener).unwrap();

        pubsub.publish("notes/n1", &op(0)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().version, Some(0));

        // version 1 never arrives
        pubsub.publish("notes/n1", &op(2)).await.unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            AppError::Engine(tandem_engine::Error::StreamGap { expected: 1, got: 2 })
        ));

        // poisoned stream released its subscription
        assert_eq!(hub.topic_count(), 0);
        assert!(stream.next().await.is_none());
    }
}
