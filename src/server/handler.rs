//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.
//! Every connection is a subscriber; a producer is simply a subscriber that
//! also sends data events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::dispatch::{ConnectionContext, DispatchTable};
use super::hub::Frame;
use super::state::AppState;
use crate::wire::Envelope;

/// Acknowledgment sent to every new connection
pub const CONNECTED_MESSAGE: &str = "Server connected, ready to receive data";

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, peer: Option<SocketAddr>) {
    let (mut sender, mut receiver) = socket.split();
    let hub = Arc::clone(&state.hub);

    let (tx, mut rx) = mpsc::channel::<Frame>(hub.config().subscriber_buffer);

    let subscriber_id = match hub.register(peer, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(peer = ?peer, error = %e, "Failed to register subscriber");
            if let Ok(text) = Envelope::status(e.to_string()).encode() {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    if let Err(e) = hub
        .send_to(&subscriber_id, &Envelope::status(CONNECTED_MESSAGE))
        .await
    {
        tracing::warn!(subscriber_id = %subscriber_id, error = %e, "Failed to queue acknowledgment");
    }

    if state.ensure_stream_started() {
        tracing::info!(subscriber_id = %subscriber_id, "Started embedded stream on connect");
    }

    let ctx = Arc::new(ConnectionContext {
        subscriber_id: subscriber_id.clone(),
        peer,
        connected_at: Utc::now(),
        hub: Arc::clone(&hub),
        data_event: state.config.data_event.clone(),
    });

    let write_timeout = state.config.write_timeout;
    let id_for_send = subscriber_id.clone();

    // Task to forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let write = sender.send(Message::Text(frame.to_string()));
            match tokio::time::timeout(write_timeout, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(subscriber_id = %id_for_send, error = %e, "WebSocket send failed, closing connection");
                    break;
                }
                Err(_) => {
                    tracing::warn!(subscriber_id = %id_for_send, "WebSocket write timed out, closing connection");
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    let dispatch = Arc::clone(&state.dispatch);
    let ctx_for_recv = Arc::clone(&ctx);

    // Task to receive frames and dispatch them
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(msg) => {
                    if !handle_ws_message(&dispatch, &ctx_for_recv, msg).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        subscriber_id = %ctx_for_recv.subscriber_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
            }
        }
    });

    // Wait for either task to complete, or for the server to stop
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
        _ = state.shutdown.cancelled() => {
            recv_task.abort();
            send_task.abort();
        }
    }

    hub.unregister(&subscriber_id).await;
    tracing::debug!(
        subscriber_id = %subscriber_id,
        connected_for_secs = (Utc::now() - ctx.connected_at).num_seconds(),
        "Connection closed"
    );
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(dispatch: &DispatchTable, ctx: &ConnectionContext, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match Envelope::decode(&text) {
                Ok(envelope) => {
                    if let Err(e) = dispatch.dispatch(ctx, envelope).await {
                        tracing::warn!(subscriber_id = %ctx.subscriber_id, error = %e, "Rejected event");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        subscriber_id = %ctx.subscriber_id,
                        error = %e,
                        "Invalid frame"
                    );
                }
            }
            true
        }
        Message::Binary(_) => {
            tracing::debug!(subscriber_id = %ctx.subscriber_id, "Ignoring binary frame");
            true
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(subscriber_id = %ctx.subscriber_id, "Client requested close");
            false
        }
    }
}
