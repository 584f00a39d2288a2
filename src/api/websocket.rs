use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::signaling::{ClientEvent, RelayServer};

/// Per-connection loop. Registers a handle with the relay on upgrade and
/// maps transport-level disconnect to room-leave semantics on the way out.
pub async fn handle_signaling_socket(websocket: WebSocket, relay: Arc<RelayServer>) {
    tracing::info!("New signaling WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let handle = relay.register(tx).await;

    // Spawn task to drain the relay's outbound channel into the socket
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                handle_socket_message(&relay, &handle, message).await;
            }
            Err(e) => {
                tracing::error!(handle = %handle, error = %e, "WebSocket error");
                break;
            }
        }
    }

    relay.disconnect(&handle).await;
    sender_task.abort();
    tracing::info!(handle = %handle, "Signaling WebSocket connection closed");
}

async fn handle_socket_message(relay: &Arc<RelayServer>, handle: &str, message: Message) {
    let Ok(text) = message.to_str() else {
        // Binary, ping and close frames carry no signaling events.
        return;
    };

    tracing::debug!(handle = %handle, "Received signaling message: {}", text);

    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => {
            relay.handle_event(handle, event).await;
        }
        Err(e) => {
            // Malformed payloads are ignored, never rejected back to the peer.
            tracing::debug!(
                handle = %handle,
                error = %e,
                raw_message = %text,
                "Ignoring unparseable signaling message"
            );
        }
    }
}
