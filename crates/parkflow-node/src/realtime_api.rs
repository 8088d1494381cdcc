//! Real-time WebSocket API for live dashboard updates.
//!
//! - `/ws` - WebSocket endpoint
//! - `/api/realtime/stats` - Statistics about real-time connections
//!
//! ## WebSocket Protocol
//!
//! ```json
//! // Subscribe to one lot's occupancy
//! {"type": "subscribe", "channel": "occupancy", "filters": {"lotId": "lot-001"}}
//!
//! // Unsubscribe from a channel
//! {"type": "unsubscribe", "channel": "occupancy"}
//!
//! // Keepalive; required at least once per heartbeat timeout
//! {"type": "ping"}
//! ```

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parkflow_realtime::{ConnectionHub, ConnectionMetadata, Envelope, Frame, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::AppState;

/// Create the real-time API routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/realtime/stats", get(get_stats))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone(), remote_addr))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>, remote_addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let write_timeout = hub.config().send_timeout();

    let accepted = match hub.accept(ConnectionMetadata::new(Some(remote_addr))).await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(remote_addr = %remote_addr, error = %e, "Rejected WebSocket client");
            if let Ok(frame) = Envelope::new(ServerMessage::Error {
                message: e.to_string(),
            })
            .encode()
            {
                let _ = timeout(write_timeout, ws_sender.send(text(&frame))).await;
            }
            let _ = timeout(write_timeout, ws_sender.close()).await;
            return;
        }
    };

    let id = accepted.id;
    let mut outbound = accepted.outbound;
    let closed = accepted.closed;
    let mut stalled = false;

    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => {
                debug!(connection_id = %id, "Connection closed by hub");
                break;
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(reason) = write_frame(&mut ws_sender, &frame, &closed, write_timeout).await {
                        debug!(connection_id = %id, reason = reason, "Stopped writing");
                        stalled = true;
                        break;
                    }
                }
                // Hub shutdown: everything queued has been written.
                None => break,
            },
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(raw))) => hub.handle_frame(&id, raw.as_str()).await,
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection_id = %id, "WebSocket close received");
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection_id = %id, "Binary message ignored");
                }
                // Protocol pings are answered by axum; liveness is the `ping` message.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    // A removed or stalled peer gets no close handshake; dropping both
    // halves closes the socket.
    let handshake = !stalled && !closed.is_cancelled();
    hub.remove(&id);
    if handshake {
        let _ = timeout(write_timeout, ws_sender.close()).await;
    }
}

/// Write one frame unless the hub closes the connection or the peer stalls.
async fn write_frame(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
    closed: &CancellationToken,
    limit: Duration,
) -> Result<(), &'static str> {
    tokio::select! {
        biased;
        _ = closed.cancelled() => Err("closed by hub"),
        result = timeout(limit, ws_sender.send(text(frame))) => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err("write failed"),
            Err(_) => Err("write timed out"),
        },
    }
}

fn text(frame: &Frame) -> Message {
    Message::Text(Utf8Bytes::from(&**frame))
}

/// Get real-time connection statistics.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.stats())
}
