//! A client session: one connection plus the documents living on it.
//!
//! The session owns the per-connection document map - constructed with the
//! session, torn down with it, never global. Connection lifecycle events
//! fan out from here: entering `Connected` unblocks every document's flush
//! and re-subscription, losing the connection requeues in-flight work so
//! the next connect resends it verbatim.

use crate::connection::{Connection, ConnectionState};
use crate::ot::TypeRegistry;
use crate::{CollectionName, Doc, DocId, Operation, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Key of a document within a session.
pub type DocKey = (CollectionName, DocId);

/// What the embedding must do after the session reached `Connected`.
#[derive(Debug, Default)]
pub struct ConnectedActions {
    /// Documents whose subscriptions must be (re)established.
    pub subscribe: Vec<DocKey>,
    /// Operations to send, one per document with queued work.
    pub send: Vec<(DocKey, Operation)>,
}

/// One client's connection and its document map.
pub struct Session {
    registry: Arc<TypeRegistry>,
    conn: Connection,
    docs: HashMap<DocKey, Doc>,
}

impl Session {
    pub fn new(registry: Arc<TypeRegistry>, connection_id: impl Into<String>) -> Self {
        Self {
            registry,
            conn: Connection::new(connection_id),
            docs: HashMap::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Get or create the local state for a document.
    pub fn doc(&mut self, collection: &str, id: &str) -> &mut Doc {
        let key = (collection.to_string(), id.to_string());
        let registry = Arc::clone(&self.registry);
        self.docs
            .entry(key)
            .or_insert_with(|| Doc::new(registry, collection, id))
    }

    pub fn get_doc(&self, collection: &str, id: &str) -> Option<&Doc> {
        self.docs
            .get(&(collection.to_string(), id.to_string()))
    }

    /// Flush one document, if the connection allows it.
    pub fn flush(&mut self, collection: &str, id: &str) -> Option<Operation> {
        let key = (collection.to_string(), id.to_string());
        let doc = self.docs.get_mut(&key)?;
        doc.flush(&mut self.conn)
    }

    /// The transport finished its handshake.
    ///
    /// Returns everything that was waiting on the connection: documents to
    /// re-subscribe and the head of every document's pending queue.
    pub fn on_connected(&mut self) -> Result<ConnectedActions> {
        self.conn.transition(ConnectionState::Connected)?;
        let mut actions = ConnectedActions::default();
        for (key, doc) in self.docs.iter_mut() {
            if doc.want_subscribe() && !doc.subscribed() {
                actions.subscribe.push(key.clone());
            }
            if let Some(op) = doc.flush(&mut self.conn) {
                actions.send.push((key.clone(), op));
            }
        }
        Ok(actions)
    }

    /// The transport dropped.
    ///
    /// Nothing is discarded: every document parks its in-flight operation
    /// (tag intact) back at the head of its queue, and subscriptions are
    /// marked for re-establishment.
    pub fn on_disconnected(&mut self) -> Result<()> {
        self.conn.transition(ConnectionState::Disconnected)?;
        for doc in self.docs.values_mut() {
            doc.handle_disconnect();
        }
        Ok(())
    }

    /// Begin a (re)connection attempt.
    pub fn on_connecting(&mut self) -> Result<()> {
        self.conn.transition(ConnectionState::Connecting)
    }

    /// Terminal shutdown.
    pub fn stop(&mut self) -> Result<()> {
        self.conn.transition(ConnectionState::Stopped)
    }
}
