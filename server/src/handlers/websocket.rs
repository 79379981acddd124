//! WebSocket handler for live table snapshots.
//!
//! Each `watch` request spawns a task that sends the table's current
//! snapshot and then a fresh one after every change. All outgoing messages
//! funnel through one channel into the socket writer.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::{AppState, Table};
use crate::websocket::{ClientMessage, ServerMessage};

use super::{handle_add, handle_list};

type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Handle an established WebSocket connection.
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = uuid::Uuid::new_v4().to_string();

    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    let mut watches: Vec<JoinHandle<()>> = Vec::new();

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        let _ = tx.send(ServerMessage::error(
                            format!("Invalid message format: {}", e),
                            None,
                        ));
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Watch {
                        table,
                        count,
                        request_id,
                    } => {
                        tracing::debug!(conn_id = %conn_id, %table, "Watch started");
                        watches.push(spawn_watch(
                            state.clone(),
                            table,
                            count,
                            request_id,
                            tx.clone(),
                        ));
                    }
                    ClientMessage::Add {
                        table,
                        documents,
                        request_id,
                    } => {
                        let response = match handle_add(&state, table, documents).await {
                            Ok(outcome) => ServerMessage::Ack {
                                table,
                                outcome,
                                request_id,
                            },
                            Err(e) => ServerMessage::error(e.to_string(), request_id),
                        };
                        let _ = tx.send(response);
                    }
                    ClientMessage::Ping => {
                        let _ = tx.send(ServerMessage::Pong);
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    for watch in &watches {
        watch.abort();
    }
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        watches = watches.len(),
        "WebSocket client disconnected"
    );
}

/// Send snapshots of `table` until the connection or the table goes away.
fn spawn_watch(
    state: AppState,
    table: Table,
    count: Option<usize>,
    request_id: Option<String>,
    tx: Outbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut changes = state.subscribe(table);
        loop {
            changes.mark_unchanged();
            let message = match handle_list(&state, table, count).await {
                Ok(documents) => ServerMessage::Snapshot {
                    table,
                    documents,
                    request_id: request_id.clone(),
                },
                Err(e) => ServerMessage::error(e.to_string(), request_id.clone()),
            };
            if tx.send(message).is_err() || changes.changed().await.is_err() {
                break;
            }
        }
    })
}
