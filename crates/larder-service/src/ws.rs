//! WebSocket handler for real-time sync updates.
//!
//! Each client receives the current status snapshot on connect, then one
//! message per status change or sync event:
//!
//! ```json
//! {"type": "status", "status": {"is_online": true, "pending_operations": 2, ...}}
//! {"type": "event", "event": {"type": "operation_synced", "id": "..."}}
//! ```

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use larder_core::SyncEvent;
use larder_types::SyncStatus;

use crate::state::AppState;

/// A message pushed to WebSocket clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Status { status: SyncStatus },
    Event { event: SyncEvent },
}

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before sending the snapshot so no change is missed.
    let mut status_rx = state.engine.watch_status();
    let mut events_rx = state.engine.events();

    info!("WebSocket client connected");

    let snapshot = StreamMessage::Status {
        status: status_rx.borrow_and_update().clone(),
    };
    if send_json(&mut sender, &snapshot).await.is_err() {
        info!("WebSocket client disconnected during initial snapshot");
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    StreamMessage::Status { status: status_rx.borrow_and_update().clone() }
                }
                event = events_rx.recv() => match event {
                    Ok(event) => StreamMessage::Event { event },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, skipped {} event(s)", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if send_json(&mut sender, &message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => debug!("Received ping"),
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("WebSocket client disconnected");
}

async fn send_json<S>(sender: &mut S, message: &StreamMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize stream message: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
