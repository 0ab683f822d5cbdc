//! WebSocket surface for real-time sync.
//!
//! Clients submit operations, subscribe to document op streams, and fetch
//! snapshots over one socket; committed operations stream back as they
//! happen.

mod handler;
mod manager;
mod protocol;

pub use handler::handle_socket;
pub use manager::{Connection, ConnectionManager, MessageSender};
pub use protocol::{ClientMessage, ServerMessage};
