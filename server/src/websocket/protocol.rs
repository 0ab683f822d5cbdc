//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded, tagged with `type` in snake_case.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use tandem_engine::{Operation, Snapshot, Version};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submit one operation for commitment.
    Submit {
        collection: String,
        id: String,
        op: Operation,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Open an operation stream for a document.
    Subscribe {
        collection: String,
        id: String,
        /// First version to deliver; omitted means "from now on".
        #[serde(default)]
        from: Option<Version>,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Tear a document's operation stream down.
    Unsubscribe {
        collection: String,
        id: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Read the current snapshot.
    Fetch {
        collection: String,
        id: String,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection: the identity the client must use
    /// as `src` on its operations.
    Init { id: String },

    /// A submission committed.
    SubmitOk {
        collection: String,
        id: String,
        /// Position the operation occupies in the document's total order.
        version: Version,
        /// Committed operations the submission was transformed against.
        transformed_against: Vec<Operation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// One committed operation from a subscribed document's stream.
    Op {
        collection: String,
        id: String,
        op: Operation,
    },

    /// Snapshot response to a fetch.
    Snapshot {
        collection: String,
        id: String,
        snapshot: Snapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A subscription is live.
    Subscribed {
        collection: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A subscription was torn down.
    Unsubscribed {
        collection: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            request_id,
        }
    }

    /// Relay an application error to the client.
    pub fn from_app_error(err: &AppError, request_id: Option<String>) -> Self {
        Self::error(err.code(), err.to_string(), request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_message_deserialization() {
        let text = r#"{"type": "subscribe", "collection": "notes", "id": "n1", "from": 3}"#;
        let msg: ClientMessage = serde_json::from_str(text).unwrap();
        match msg {
            ClientMessage::Subscribe {
                collection,
                id,
                from,
                ..
            } => {
                assert_eq!(collection, "notes");
                assert_eq!(id, "n1");
                assert_eq!(from, Some(3));
            }
            _ => panic!("expected Subscribe"),
        }

        let text = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(text).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn submit_carries_an_operation() {
        let text = r#"{
            "type": "submit",
            "collection": "notes",
            "id": "n1",
            "op": {"src": "c1", "seq": 1, "version": 0, "action": "delete"},
            "request_id": "r1"
        }"#;
        let msg: ClientMessage = serde_json::from_str(text).unwrap();
        match msg {
            ClientMessage::Submit { op, request_id, .. } => {
                assert!(op.is_delete());
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            _ => panic!("expected Submit"),
        }
    }

    #[test]
    fn server_message_serialization() {
        let text = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(text, r#"{"type":"pong"}"#);

        let msg = ServerMessage::error("bad_request", "nope", Some("r1".into()));
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""type":"error""#));
        assert!(text.contains(r#""code":"bad_request""#));
        assert!(text.contains(r#""request_id":"r1""#));

        let msg = ServerMessage::Op {
            collection: "notes".into(),
            id: "n1".into(),
            op: tandem_engine::Operation::edit("c1", 1, Some(2), json!([])),
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""type":"op""#));
        assert!(text.contains(r#""version":2"#));
    }
}
