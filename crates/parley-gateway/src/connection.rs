use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use parley_db::Database;
use parley_types::events::{ClientCommand, GatewayEvent};

use crate::registry::{EventSender, SessionRegistry};
use crate::relay;

/// Identity resolved at the HTTP upgrade. A connection without one is
/// anonymous: it stays open but is never bound to a channel and every send
/// intent is rejected before touching the store.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

/// Drive one WebSocket connection from join to leave.
pub async fn handle_connection(
    socket: WebSocket,
    registry: SessionRegistry,
    db: Arc<Database>,
    identity: Option<Identity>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Every connection gets its own delivery channel. For authenticated
    // connections the sending half is also registered on the user's channel;
    // either way it carries connection-local events (ready, errors).
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let joined = match &identity {
        Some(id) => {
            let conn_id = registry.join(id.user_id, tx.clone()).await;
            info!("{} ({}) connected to gateway", id.username, id.user_id);

            let _ = tx.send(GatewayEvent::Ready {
                user_id: id.user_id,
                username: id.username.clone(),
            });

            // Presence is self-notification only: the user's own channel
            // (their other devices), never other users.
            registry
                .broadcast(
                    id.user_id,
                    GatewayEvent::Status {
                        msg: format!("{} connected", id.username),
                    },
                )
                .await;

            Some(conn_id)
        }
        None => {
            info!("anonymous client connected to gateway");
            None
        }
    };

    // Forward delivery channel -> client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = serde_json::to_string(&event).unwrap();
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read commands from client
    let recv_registry = registry.clone();
    let recv_identity = identity.clone();
    let recv_db = db.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &recv_db,
                            &recv_registry,
                            recv_identity.as_ref(),
                            &tx,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!("bad command: {} -- raw: {}", e, log_preview(&text));
                        let _ = tx.send(GatewayEvent::Error {
                            message: "Unrecognized command.".into(),
                        });
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    match (&identity, joined) {
        (Some(id), Some(conn_id)) => {
            registry.leave(id.user_id, conn_id).await;
            registry
                .broadcast(
                    id.user_id,
                    GatewayEvent::Status {
                        msg: format!("{} disconnected", id.username),
                    },
                )
                .await;
            info!("{} ({}) disconnected from gateway", id.username, id.user_id);
        }
        _ => info!("anonymous client disconnected from gateway"),
    }
}

/// First 200 characters of an inbound frame, cut on a char boundary so
/// multi-byte text never panics the slice.
fn log_preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Dispatch one inbound command. Authorization precedes validation: an
/// anonymous connection is turned away before any field is looked at.
async fn handle_command(
    db: &Arc<Database>,
    registry: &SessionRegistry,
    identity: Option<&Identity>,
    tx: &EventSender,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::SendMessage { receiver_id, content } => {
            let Some(identity) = identity else {
                let _ = tx.send(GatewayEvent::Error {
                    message: "Authentication required.".into(),
                });
                return;
            };

            if let Err(e) =
                relay::relay_message(db.clone(), registry, identity.user_id, receiver_id, content)
                    .await
            {
                warn!("{} ({}) send rejected: {}", identity.username, identity.user_id, e);
                let _ = tx.send(GatewayEvent::Error { message: e.to_string() });
            }
        }
    }
}
