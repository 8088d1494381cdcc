//! Per-connection state owned by the hub.

use crate::error::RealtimeError;
use crate::message::Frame;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a connected client.
pub type ConnectionId = String;

/// A live client connection as seen by the registry.
///
/// Only the hub mutates this, always under its state lock.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Outbound queue drained by the socket task.
    sender: mpsc::Sender<Frame>,
    /// Cancelled when the connection is removed; interrupts the socket task.
    closed: CancellationToken,
    /// Channels this connection is subscribed to.
    subscriptions: HashSet<String>,
    /// Last liveness signal.
    last_heartbeat: Instant,
    /// Facts captured at accept time.
    pub metadata: ConnectionMetadata,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        sender: mpsc::Sender<Frame>,
        closed: CancellationToken,
        metadata: ConnectionMetadata,
    ) -> Self {
        Self {
            id,
            sender,
            closed,
            subscriptions: HashSet::new(),
            last_heartbeat: Instant::now(),
            metadata,
        }
    }

    /// Sender half used for delivery outside the state lock.
    pub(crate) fn sender(&self) -> mpsc::Sender<Frame> {
        self.sender.clone()
    }

    /// Close the transport.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    /// Token that closes the transport, detached from the outbound queue.
    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub(crate) fn subscriptions(&self) -> &HashSet<String> {
        &self.subscriptions
    }

    pub(crate) fn subscriptions_mut(&mut self) -> &mut HashSet<String> {
        &mut self.subscriptions
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_heartbeat = now;
    }

    /// Whether the last heartbeat is older than `timeout` at `now`.
    pub(crate) fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }
}

/// Metadata about a client connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetadata {
    /// Remote socket address, when the transport exposes one.
    pub remote_addr: Option<SocketAddr>,
    /// When the client connected (milliseconds since the Unix epoch).
    pub connected_at: u64,
}

impl ConnectionMetadata {
    /// Create metadata stamped with the current time.
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            remote_addr,
            connected_at: crate::message::now_millis(),
        }
    }
}

/// What the socket task receives from a successful accept.
#[derive(Debug)]
pub struct AcceptedConnection {
    /// Identifier assigned by the hub.
    pub id: ConnectionId,
    /// Frames to write to the socket, in order.
    pub outbound: mpsc::Receiver<Frame>,
    /// Cancelled when the hub removes or evicts the connection. The socket
    /// task must stop writing at once. On hub shutdown the `outbound` queue
    /// ends instead, and this fires only if draining outlasts the grace period.
    pub closed: CancellationToken,
}

/// Push one frame, waiting at most `timeout` for queue space.
pub(crate) async fn deliver(
    sender: &mpsc::Sender<Frame>,
    frame: Frame,
    timeout: Duration,
) -> Result<(), RealtimeError> {
    sender.send_timeout(frame, timeout).await.map_err(|e| match e {
        mpsc::error::SendTimeoutError::Timeout(_) => {
            RealtimeError::SendFailed(format!("send timed out after {:?}", timeout))
        }
        mpsc::error::SendTimeoutError::Closed(_) => RealtimeError::ChannelClosed,
    })
}
