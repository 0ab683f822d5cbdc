//! # Tandem Engine
//!
//! The consistency core of Tandem, a real-time collaborative-document
//! synchronization engine built on operational transformation.
//!
//! Many clients hold optimistic local copies of a shared document; a
//! server-side authority linearizes concurrent edits into a single total
//! order; and every replica converges to the same state regardless of
//! network timing. This crate holds everything about that protocol which is
//! deterministic and synchronous - the server half (the submission pipeline)
//! and the transports live in `tandem-server`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of sockets, storage, or clocks
//! - **Deterministic**: same inputs always produce the same outputs
//! - **Explicit states**: queues, in-flight slots, and connection lifecycle
//!   are data, not callback chains
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! Changes travel as [`Operation`]s: a tagged body (create / edit / delete),
//! a writer identity `(src, seq)` for idempotent resubmission, and the
//! document version the change intends to apply at.
//!
//! ### OT types
//!
//! An [`ot::OtType`] knows how to apply a delta to document data and how to
//! rewrite one delta past another, concurrent one. Types register in an
//! [`ot::TypeRegistry`]; the built-in [`ot::JsonOt`] covers JSON documents
//! with path-based components.
//!
//! ### Documents
//!
//! A [`Doc`] is the client state machine: local edits apply optimistically
//! and queue for submission (composing while unsent), incoming committed
//! operations are transformed against the queued work, and rejections roll
//! back via inversion or a resynchronizing fetch.
//!
//! ### Streams
//!
//! [`StreamState`] sequences one document's committed operations: catch-up
//! history must be contiguous, live operations are delivered exactly once in
//! version order, and a skipped version is an error rather than a silent gap.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tandem_engine::{Connection, ConnectionState, Doc, ot::TypeRegistry};
//!
//! let registry = Arc::new(TypeRegistry::with_defaults());
//! let mut conn = Connection::new("client-1");
//! conn.transition(ConnectionState::Connected).unwrap();
//!
//! let mut doc = Doc::new(Arc::clone(&registry), "notes", "note-1");
//! doc.create("json", json!({"title": "hello"})).unwrap();
//!
//! // The flushed operation goes to the authority...
//! let op = doc.flush(&mut conn).unwrap();
//! assert_eq!(op.src, "client-1");
//!
//! // ...which commits it at version 0 and acknowledges.
//! doc.ack(0).unwrap();
//! assert_eq!(doc.version(), Some(1));
//! ```

pub mod connection;
pub mod doc;
pub mod error;
pub mod operation;
pub mod ot;
pub mod session;
pub mod snapshot;
pub mod stream;

// Re-export main types at crate root
pub use connection::{Connection, ConnectionState, RetryPolicy};
pub use doc::{Doc, DocEvent, OpTicket};
pub use error::{Error, Result};
pub use operation::{OpBody, Operation, OperationId};
pub use session::{ConnectedActions, Session};
pub use snapshot::Snapshot;
pub use stream::StreamState;

/// Type aliases for clarity
pub type CollectionName = String;
pub type DocId = String;
pub type Source = String;
pub type Seq = u64;
pub type Version = u64;
