//! WebSocket handler for the sync protocol.
//!
//! Each connection gets an identity handshake, an outgoing forward task,
//! and a dispatch loop. Every subscription runs as its own pump task that
//! drains the document's [`OpStream`](crate::stream::OpStream) into the
//! connection channel; unsubscribing or dropping the socket aborts the
//! pump, which releases the underlying stream.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::websocket::{ClientMessage, ConnectionManager, MessageSender, ServerMessage};

/// Handle an established WebSocket connection until it closes.
pub async fn handle_socket(
    socket: WebSocket,
    backend: Arc<Backend>,
    manager: Arc<ConnectionManager>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = manager.register(tx.clone());

    // Identity handshake: the client uses this id as `src`.
    let _ = tx.send(ServerMessage::Init {
        id: conn_id.clone(),
    });

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("failed to serialize websocket message: {e}");
                }
            }
        }
    });

    let mut pumps: HashMap<(String, String), JoinHandle<()>> = HashMap::new();

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                dispatch(&text, &backend, &tx, &mut pumps).await;
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "websocket close frame received");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "websocket error: {e}");
                break;
            }
        }
    }

    for (_, pump) in pumps.drain() {
        pump.abort();
    }
    manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = manager.connection_count(),
        "websocket client disconnected"
    );
}

async fn dispatch(
    text: &str,
    backend: &Arc<Backend>,
    tx: &MessageSender,
    pumps: &mut HashMap<(String, String), JoinHandle<()>>,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            let _ = tx.send(ServerMessage::error(
                "bad_message",
                format!("invalid message format: {e}"),
                None,
            ));
            return;
        }
    };

    match msg {
        ClientMessage::Submit {
            collection,
            id,
            op,
            request_id,
        } => {
            let reply = match backend.submit(&collection, &id, op).await {
                Ok(outcome) => ServerMessage::SubmitOk {
                    collection,
                    id,
                    version: outcome.version,
                    transformed_against: outcome.transformed_against,
                    request_id,
                },
                Err(e) => ServerMessage::from_app_error(&e, request_id),
            };
            let _ = tx.send(reply);
        }

        ClientMessage::Subscribe {
            collection,
            id,
            from,
            request_id,
        } => match backend.subscribe(&collection, &id, from).await {
            Ok(mut stream) => {
                let _ = tx.send(ServerMessage::Subscribed {
                    collection: collection.clone(),
                    id: id.clone(),
                    request_id,
                });
                let pump_tx = tx.clone();
                let (pump_collection, pump_id) = (collection.clone(), id.clone());
                let pump = tokio::spawn(async move {
                    while let Some(item) = stream.next().await {
                        let msg = match item {
                            Ok(op) => ServerMessage::Op {
                                collection: pump_collection.clone(),
                                id: pump_id.clone(),
                                op,
                            },
                            Err(e) => ServerMessage::from_app_error(&e, None),
                        };
                        if pump_tx.send(msg).is_err() {
                            break;
                        }
                    }
                });
                if let Some(previous) = pumps.insert((collection, id), pump) {
                    previous.abort();
                }
            }
            Err(e) => {
                let _ = tx.send(ServerMessage::from_app_error(&e, request_id));
            }
        },

        ClientMessage::Unsubscribe {
            collection,
            id,
            request_id,
        } => {
            if let Some(pump) = pumps.remove(&(collection.clone(), id.clone())) {
                // aborting the pump drops the stream, releasing the
                // shared topic subscription underneath
                pump.abort();
            }
            let _ = tx.send(ServerMessage::Unsubscribed {
                collection,
                id,
                request_id,
            });
        }

        ClientMessage::Fetch {
            collection,
            id,
            request_id,
        } => {
            let reply = match backend.fetch(&collection, &id).await {
                Ok(snapshot) => ServerMessage::Snapshot {
                    collection,
                    id,
                    snapshot,
                    request_id,
                },
                Err(e) => ServerMessage::from_app_error(&e, request_id),
            };
            let _ = tx.send(reply);
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}
