//! Full round trips: engine document state machines driving the backend.
//!
//! These tests wire the optimistic client core directly to the authority,
//! exercising the paths a transport would normally sit between: flush ->
//! submit -> acknowledgment with transformed priors, subscription delivery,
//! rejection rollback, and idempotent resubmission after a reconnect.

use std::sync::Arc;

use serde_json::json;
use tandem_engine::ot::TypeRegistry;
use tandem_engine::{Connection, ConnectionState, Doc};
use tandem_server::backend::Backend;
use tandem_server::pubsub::MemoryPubSub;
use tandem_server::storage::MemoryStorage;

fn backend() -> Arc<Backend> {
    Arc::new(Backend::new(
        Arc::new(TypeRegistry::with_defaults()),
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryPubSub::new()),
    ))
}

fn client(registry: &Arc<TypeRegistry>, id: &str) -> (Doc, Connection) {
    let doc = Doc::new(Arc::clone(registry), "profiles", "p1");
    let mut conn = Connection::new(id);
    conn.transition(ConnectionState::Connected).unwrap();
    (doc, conn)
}

#[tokio::test]
async fn optimistic_clients_converge_through_the_backend() {
    let backend = backend();
    let registry = Arc::clone(backend.registry());
    let (mut alice, mut alice_conn) = client(&registry, "alice");
    let (mut bob, mut bob_conn) = client(&registry, "bob");

    // Alice creates and is acknowledged.
    alice.create("json", json!({"age": 3})).unwrap();
    let op = alice.flush(&mut alice_conn).unwrap();
    let outcome = backend.submit("profiles", "p1", op).await.unwrap();
    alice
        .handle_submit_ok(outcome.version, outcome.transformed_against)
        .unwrap();

    // Bob joins: fetch, then subscribe from his version.
    let snapshot = backend.fetch("profiles", "p1").await.unwrap();
    bob.apply_fetch(&snapshot).unwrap();
    let mut bob_stream = backend
        .subscribe("profiles", "p1", Some(snapshot.version))
        .await
        .unwrap();

    // Both edit concurrently at version 1.
    alice.submit_edit(json!([{"p": ["age"], "na": 7}])).unwrap();
    bob.submit_edit(json!([{"p": ["age"], "na": 2}])).unwrap();
    let alice_op = alice.flush(&mut alice_conn).unwrap();
    let bob_op = bob.flush(&mut bob_conn).unwrap();

    // Bob wins the race; Alice catches up through her ack's priors.
    let bob_outcome = backend.submit("profiles", "p1", bob_op).await.unwrap();
    let alice_outcome = backend.submit("profiles", "p1", alice_op).await.unwrap();
    assert_eq!(bob_outcome.version, 1);
    assert_eq!(alice_outcome.version, 2);

    bob.handle_submit_ok(bob_outcome.version, bob_outcome.transformed_against)
        .unwrap();
    alice
        .handle_submit_ok(alice_outcome.version, alice_outcome.transformed_against)
        .unwrap();

    // Bob's subscription replays his own op (stale, dropped) and delivers
    // Alice's.
    for _ in 0..2 {
        let op = bob_stream.next().await.unwrap().unwrap();
        bob.handle_remote_op(&op).unwrap();
    }

    assert_eq!(alice.data(), Some(&json!({"age": 12})));
    assert_eq!(bob.data(), Some(&json!({"age": 12})));
    assert_eq!(alice.version(), Some(3));
    assert_eq!(bob.version(), Some(3));
}

#[tokio::test]
async fn server_rejection_rolls_the_client_back() {
    let backend = backend();
    let registry = Arc::clone(backend.registry());
    let (mut alice, mut alice_conn) = client(&registry, "alice");
    let (mut bob, mut bob_conn) = client(&registry, "bob");

    alice.create("json", json!({"age": 3})).unwrap();
    let op = alice.flush(&mut alice_conn).unwrap();
    let outcome = backend.submit("profiles", "p1", op).await.unwrap();
    alice
        .handle_submit_ok(outcome.version, outcome.transformed_against)
        .unwrap();

    let snapshot = backend.fetch("profiles", "p1").await.unwrap();
    bob.apply_fetch(&snapshot).unwrap();

    // Bob deletes first; Alice's stale edit is rejected by the pipeline.
    bob.delete().unwrap();
    let bob_op = bob.flush(&mut bob_conn).unwrap();
    backend.submit("profiles", "p1", bob_op).await.unwrap();

    alice.submit_edit(json!([{"p": ["age"], "na": 1}])).unwrap();
    let alice_op = alice.flush(&mut alice_conn).unwrap();
    let err = backend.submit("profiles", "p1", alice_op).await.unwrap_err();

    // The transport relays the rejection; the JSON type can invert, so the
    // optimistic +1 is undone in place.
    alice.handle_rejection(tandem_engine::Error::Rejected(err.to_string()));
    assert_eq!(alice.data(), Some(&json!({"age": 3})));
    assert!(!alice.has_pending_writes());
}

#[tokio::test]
async fn unacknowledged_create_resubmits_idempotently() {
    let backend = backend();
    let registry = Arc::clone(backend.registry());
    let (mut alice, mut alice_conn) = client(&registry, "alice");

    alice.create("json", json!({"draft": true})).unwrap();
    let first_send = alice.flush(&mut alice_conn).unwrap();

    // The create reaches the authority, but the ack is lost and the
    // connection drops.
    backend
        .submit("profiles", "p1", first_send.clone())
        .await
        .unwrap();
    alice.handle_disconnect();
    alice_conn
        .transition(ConnectionState::Disconnected)
        .unwrap();

    // Reconnect and resend verbatim.
    alice_conn.transition(ConnectionState::Connecting).unwrap();
    alice_conn.transition(ConnectionState::Connected).unwrap();
    let second_send = alice.flush(&mut alice_conn).unwrap();
    assert_eq!(first_send.src, second_send.src);
    assert_eq!(first_send.seq, second_send.seq);

    let outcome = backend
        .submit("profiles", "p1", second_send)
        .await
        .unwrap();
    assert_eq!(outcome.version, 0);
    alice
        .handle_submit_ok(outcome.version, outcome.transformed_against)
        .unwrap();

    // one commit, not two
    let ops = backend.get_ops("profiles", "p1", 0, None).await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(alice.version(), Some(1));
}
