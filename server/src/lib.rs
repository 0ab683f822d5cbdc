//! Tandem Server - the synchronization authority for collaborative
//! documents.
//!
//! The server linearizes concurrent edits into a per-document total order
//! (the [`backend::Backend`] submission pipeline), broadcasts every
//! committed operation on its document topic, and serves gap-free operation
//! streams to subscribers. Storage and pub/sub are collaborator traits with
//! in-memory defaults; swap them out to scale beyond one process.

pub mod backend;
pub mod config;
pub mod error;
pub mod pubsub;
pub mod routes;
pub mod storage;
pub mod stream;
pub mod websocket;

use crate::backend::Backend;
use crate::config::Config;
use crate::websocket::ConnectionManager;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}
