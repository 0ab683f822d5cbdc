//! Integration tests for subscriptions and operation streams.

use std::sync::Arc;

use serde_json::json;
use tandem_engine::ot::TypeRegistry;
use tandem_engine::Operation;
use tandem_server::backend::Backend;
use tandem_server::error::AppError;
use tandem_server::pubsub::{MemoryPubSub, PubSub};
use tandem_server::storage::MemoryStorage;

fn backend_with_pubsub() -> (Arc<Backend>, Arc<MemoryPubSub>) {
    let pubsub = Arc::new(MemoryPubSub::new());
    let backend = Backend::new(
        Arc::new(TypeRegistry::with_defaults()),
        Arc::new(MemoryStorage::new()),
        Arc::clone(&pubsub) as Arc<dyn PubSub>,
    );
    (Arc::new(backend), pubsub)
}

#[tokio::test]
async fn subscribe_catches_up_then_goes_live() {
    let (backend, _) = backend_with_pubsub();

    let create = Operation::create("alice", 1, None, "json", json!({"n": 0}));
    backend.submit("notes", "n1", create).await.unwrap();
    let edit = Operation::edit("alice", 2, None, json!([{"p": ["n"], "na": 1}]));
    backend.submit("notes", "n1", edit).await.unwrap();

    let mut stream = backend.subscribe("notes", "n1", Some(0)).await.unwrap();

    // history first
    let op = stream.next().await.unwrap().unwrap();
    assert_eq!(op.version, Some(0));
    assert!(op.is_create());
    let op = stream.next().await.unwrap().unwrap();
    assert_eq!(op.version, Some(1));

    // then live pass-through
    let edit = Operation::edit("alice", 3, None, json!([{"p": ["n"], "na": 1}]));
    backend.submit("notes", "n1", edit).await.unwrap();
    let op = stream.next().await.unwrap().unwrap();
    assert_eq!(op.version, Some(2));
}

#[tokio::test]
async fn subscribe_from_now_skips_history() {
    let (backend, _) = backend_with_pubsub();

    let create = Operation::create("alice", 1, None, "json", json!({"n": 0}));
    backend.submit("notes", "n1", create).await.unwrap();

    let mut stream = backend.subscribe("notes", "n1", None).await.unwrap();

    let edit = Operation::edit("alice", 2, None, json!([{"p": ["n"], "na": 1}]));
    backend.submit("notes", "n1", edit).await.unwrap();

    let op = stream.next().await.unwrap().unwrap();
    assert_eq!(op.version, Some(1));
}

#[tokio::test]
async fn version_gap_surfaces_as_an_error() {
    let (backend, pubsub) = backend_with_pubsub();

    let create = Operation::create("alice", 1, None, "json", json!({"n": 0}));
    backend.submit("notes", "n1", create).await.unwrap();

    let mut stream = backend.subscribe("notes", "n1", None).await.unwrap();

    // a broadcast loses an op: version 1 never arrives, version 2 does
    let orphan = Operation::edit("ghost", 1, Some(2), json!([{"p": ["n"], "na": 1}]));
    pubsub.publish("notes/n1", &orphan).await.unwrap();

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        AppError::Engine(tandem_engine::Error::StreamGap {
            expected: 1,
            got: 2
        })
    ));
    // the poisoned stream is done
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn topic_subscriptions_are_shared_and_refcounted() {
    let (backend, _) = backend_with_pubsub();

    let create = Operation::create("alice", 1, None, "json", json!({"n": 0}));
    backend.submit("notes", "n1", create).await.unwrap();

    let mut first = backend.subscribe("notes", "n1", None).await.unwrap();
    let mut second = backend.subscribe("notes", "n1", None).await.unwrap();
    assert_eq!(backend.active_topics(), 1);

    // destroy is synchronous and idempotent
    first.destroy();
    first.destroy();
    assert_eq!(backend.active_topics(), 1);

    // the surviving stream still receives
    let edit = Operation::edit("alice", 2, None, json!([{"p": ["n"], "na": 1}]));
    backend.submit("notes", "n1", edit).await.unwrap();
    let op = second.next().await.unwrap().unwrap();
    assert_eq!(op.version, Some(1));

    second.destroy();
    assert_eq!(backend.active_topics(), 0);
}

#[tokio::test]
async fn dropping_a_stream_releases_its_subscription() {
    let (backend, _) = backend_with_pubsub();

    let create = Operation::create("alice", 1, None, "json", json!({"n": 0}));
    backend.submit("notes", "n1", create).await.unwrap();

    let stream = backend.subscribe("notes", "n1", None).await.unwrap();
    assert_eq!(backend.active_topics(), 1);
    drop(stream);
    assert_eq!(backend.active_topics(), 0);
}

#[tokio::test]
async fn streams_of_different_documents_are_independent() {
    let (backend, _) = backend_with_pubsub();

    for id in ["a", "b"] {
        let create = Operation::create("alice", 1, None, "json", json!({"doc": id}));
        backend.submit("notes", id, create).await.unwrap();
    }

    let mut stream_a = backend.subscribe("notes", "a", None).await.unwrap();
    let mut stream_b = backend.subscribe("notes", "b", None).await.unwrap();
    assert_eq!(backend.active_topics(), 2);

    let edit = Operation::edit("alice", 2, None, json!([{"p": ["doc"], "oi": "b2"}]));
    backend.submit("notes", "b", edit).await.unwrap();

    let op = stream_b.next().await.unwrap().unwrap();
    assert_eq!(op.version, Some(1));

    // nothing for stream a; its feed stays open and empty
    let pending = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        stream_a.next(),
    )
    .await;
    assert!(pending.is_err());
}
