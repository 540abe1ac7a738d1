//! WebSocket endpoint for the live status feed
//!
//! Each connection registers one hub subscriber. A writer task forwards
//! hub payloads to the socket and sends a close frame once the hub drops the
//! subscriber. Inbound frames are read only to notice the peer going away.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use super::handlers::AppState;

pub async fn status_feed(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = match state.hub.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting status subscriber");
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let subscriber = subscription.id();
    tracing::debug!(subscriber, "Status subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = subscription.recv().await {
            if sender.send(Message::Text(payload.to_string())).await.is_err() {
                return;
            }
        }
        // Removed by the hub or hub shut down
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    // Dropping the subscription (inside the writer) deregisters it; this
    // covers the case where the writer was aborted mid-send.
    let _ = state.hub.unsubscribe(subscriber).await;
    tracing::debug!(subscriber, "Status subscriber disconnected");
}
