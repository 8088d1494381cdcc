//! Connection hub: registry, subscription index and dispatch.
//!
//! The registry and the index live behind one mutex so that a connection's
//! subscription set and its index membership always change together. The
//! lock is never held across an `.await`: dispatch copies out the recipient
//! senders first and then delivers without it.

use crate::config::HubConfig;
use crate::connection::{deliver, AcceptedConnection, Connection, ConnectionId, ConnectionMetadata};
use crate::error::RealtimeError;
use crate::filter::Filter;
use crate::message::{ClientCommand, Envelope, Frame, ServerMessage};
use crate::snapshot::{NoSnapshots, SnapshotProvider};
use crate::subscription::SubscriptionIndex;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Greeting carried by the `connected` message.
const WELCOME_MESSAGE: &str = "Connected to ParkFlow real-time service";

/// Notice carried by the `server_shutdown` message.
const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Registry and index, mutated together.
#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    index: SubscriptionIndex,
}

impl HubState {
    /// Unlink a connection from the registry and from every channel it was in.
    fn unlink(&mut self, id: &str) -> Option<Connection> {
        let conn = self.connections.remove(id)?;
        self.index.remove_all(&conn.id, conn.subscriptions());
        Some(conn)
    }

    fn sender(&self, id: &str) -> Option<mpsc::Sender<Frame>> {
        self.connections.get(id).map(Connection::sender)
    }
}

/// Connection hub shared by socket tasks, the heartbeat monitor and event
/// producers.
pub struct ConnectionHub {
    config: HubConfig,
    state: Mutex<HubState>,
    snapshots: Arc<dyn SnapshotProvider>,
    stats: RwLock<HubStats>,
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("config", &self.config)
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl ConnectionHub {
    /// Create a hub that fetches initial channel state from `snapshots`.
    pub fn new(config: HubConfig, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            config,
            state: Mutex::new(HubState::default()),
            snapshots,
            stats: RwLock::new(HubStats::default()),
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new connection and greet it with its id.
    pub async fn accept(
        &self,
        metadata: ConnectionMetadata,
    ) -> Result<AcceptedConnection, RealtimeError> {
        let (sender, outbound) = mpsc::channel(self.config.outbound_buffer.max(1));
        let closed = CancellationToken::new();
        let id: ConnectionId = uuid::Uuid::new_v4().to_string();
        let remote_addr = metadata.remote_addr;

        {
            let mut state = self.state.lock();
            if state.connections.len() >= self.config.max_connections {
                return Err(RealtimeError::ConnectionLimit(self.config.max_connections));
            }
            state.connections.insert(
                id.clone(),
                Connection::new(id.clone(), sender, closed.clone(), metadata),
            );
        }
        self.stats.write().total_connections += 1;

        info!(connection_id = %id, remote_addr = ?remote_addr, "Client connected");

        self.send_to(
            &id,
            ServerMessage::Connected {
                client_id: id.clone(),
                message: WELCOME_MESSAGE.to_string(),
            },
        )
        .await;

        Ok(AcceptedConnection {
            id,
            outbound,
            closed,
        })
    }

    /// Remove a connection, close its transport and drop its subscriptions.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn remove(&self, id: &str) -> bool {
        let Some(conn) = self.state.lock().unlink(id) else {
            return false;
        };
        conn.close();
        info!(connection_id = %id, "Client disconnected");
        true
    }

    /// Record a liveness signal. Unknown ids are ignored.
    pub fn touch(&self, id: &str) {
        if let Some(conn) = self.state.lock().connections.get_mut(id) {
            conn.touch(Instant::now());
        }
    }

    /// Subscribe a connection to a channel, acknowledge it, then deliver the
    /// channel's current snapshot to that connection only.
    pub async fn subscribe(
        &self,
        id: &str,
        channel: &str,
        filters: Filter,
    ) -> Result<(), RealtimeError> {
        let is_new = {
            let mut state = self.state.lock();
            let HubState { connections, index } = &mut *state;
            let conn = connections
                .get_mut(id)
                .ok_or_else(|| RealtimeError::ConnectionNotFound(id.to_string()))?;

            let subscriptions = conn.subscriptions_mut();
            if !subscriptions.contains(channel)
                && subscriptions.len() >= self.config.max_subscriptions_per_connection
            {
                return Err(RealtimeError::SubscriptionLimit(
                    self.config.max_subscriptions_per_connection,
                ));
            }
            subscriptions.insert(channel.to_string());
            index.insert(channel, &conn.id, filters.clone())
        };

        if is_new {
            self.stats.write().total_subscriptions += 1;
        }
        debug!(connection_id = %id, channel = %channel, "Client subscribed");

        self.send_to(
            id,
            ServerMessage::Subscribed {
                channel: channel.to_string(),
            },
        )
        .await;

        if let Some(data) = self.snapshots.snapshot(channel, &filters).await {
            self.send_to(
                id,
                ServerMessage::InitialData {
                    channel: channel.to_string(),
                    data,
                },
            )
            .await;
        }

        Ok(())
    }

    /// Unsubscribe a connection from a channel and acknowledge it.
    ///
    /// Returns `true` if the connection was subscribed.
    pub async fn unsubscribe(&self, id: &str, channel: &str) -> bool {
        let was_subscribed = {
            let mut state = self.state.lock();
            let HubState { connections, index } = &mut *state;
            match connections.get_mut(id) {
                Some(conn) => {
                    conn.subscriptions_mut().remove(channel);
                    index.remove(channel, &conn.id)
                }
                None => false,
            }
        };

        if was_subscribed {
            debug!(connection_id = %id, channel = %channel, "Client unsubscribed");
        }

        self.send_to(
            id,
            ServerMessage::Unsubscribed {
                channel: channel.to_string(),
            },
        )
        .await;

        was_subscribed
    }

    /// Deliver `payload` as an `update` to every subscriber of `channel`
    /// whose filter matches it.
    ///
    /// Returns the number of connections the update reached.
    pub async fn broadcast(&self, channel: &str, payload: Value) -> usize {
        let recipients: Vec<(ConnectionId, mpsc::Sender<Frame>)> = {
            let state = self.state.lock();
            state
                .index
                .subscribers(channel)
                .filter(|(_, filter)| filter.matches(&payload))
                .filter_map(|(id, _)| state.sender(id).map(|sender| (id.clone(), sender)))
                .collect()
        };

        if recipients.is_empty() {
            debug!(channel = %channel, "No matching subscribers");
            return 0;
        }

        let frame = match Envelope::new(ServerMessage::Update {
            channel: channel.to_string(),
            data: payload,
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to serialize update");
                return 0;
            }
        };

        let delivered = self.deliver_all(recipients, frame).await;
        self.stats.write().total_broadcasts += 1;

        debug!(channel = %channel, recipients = delivered, "Broadcast delivered");
        delivered
    }

    /// Deliver a message to one connection, bypassing subscriptions.
    ///
    /// Unknown ids are ignored. Returns `true` if the message was queued.
    pub async fn send_to(&self, id: &str, message: ServerMessage) -> bool {
        let sender = self.state.lock().sender(id);
        let Some(sender) = sender else {
            debug!(connection_id = %id, "Send to unknown connection skipped");
            return false;
        };

        let frame = match Envelope::new(message).encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection_id = %id, error = %e, "Failed to serialize message");
                return false;
            }
        };

        match deliver(&sender, frame, self.config.send_timeout()).await {
            Ok(()) => true,
            Err(e) => {
                self.evict(id, &e);
                false
            }
        }
    }

    /// Deliver a message to every registered connection.
    pub async fn broadcast_all(&self, message: ServerMessage) -> usize {
        let recipients: Vec<(ConnectionId, mpsc::Sender<Frame>)> = self
            .state
            .lock()
            .connections
            .values()
            .map(|conn| (conn.id.clone(), conn.sender()))
            .collect();

        let frame = match Envelope::new(message).encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        self.deliver_all(recipients, frame).await
    }

    /// Decode and act on one inbound text frame.
    pub async fn handle_frame(&self, id: &str, raw: &str) {
        match ClientCommand::decode(raw) {
            Ok(command) => self.handle_command(id, command).await,
            Err(e) => {
                debug!(connection_id = %id, error = ?e, "Rejected inbound frame");
                self.send_to(
                    id,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                )
                .await;
            }
        }
    }

    /// Handle a decoded client command.
    pub async fn handle_command(&self, id: &str, command: ClientCommand) {
        match command {
            ClientCommand::Ping => {
                self.touch(id);
                self.send_to(id, ServerMessage::Pong).await;
            }
            ClientCommand::Subscribe { channel, filters } => {
                match self.subscribe(id, &channel, filters).await {
                    Ok(()) => {}
                    Err(RealtimeError::ConnectionNotFound(_)) => {
                        debug!(connection_id = %id, "Subscribe from removed connection");
                    }
                    Err(e) => {
                        self.send_to(
                            id,
                            ServerMessage::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
            ClientCommand::Unsubscribe { channel } => {
                self.unsubscribe(id, &channel).await;
            }
            ClientCommand::Request {
                request_id,
                action,
                params,
            } => {
                let data = self.snapshots.respond(&action, &params).await;
                self.send_to(id, ServerMessage::Response { request_id, data })
                    .await;
            }
        }
    }

    /// Remove every connection whose last heartbeat is older than the
    /// configured timeout at `now`. No message is sent to evicted clients.
    pub fn evict_stale(&self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.config.heartbeat_timeout();
        let evicted: Vec<Connection> = {
            let mut state = self.state.lock();
            let stale: Vec<ConnectionId> = state
                .connections
                .values()
                .filter(|conn| conn.is_stale(now, timeout))
                .map(|conn| conn.id.clone())
                .collect();
            stale.iter().filter_map(|id| state.unlink(id)).collect()
        };

        if !evicted.is_empty() {
            self.stats.write().total_evictions += evicted.len() as u64;
        }

        evicted
            .into_iter()
            .map(|conn| {
                conn.close();
                info!(connection_id = %conn.id, "Client heartbeat timeout, removed");
                conn.id
            })
            .collect()
    }

    /// Notify every client and drop all connections.
    ///
    /// Dropping a connection ends its outbound queue, so socket tasks write
    /// what was queued up to and including `server_shutdown` and then stop.
    /// Transports still draining after `send_timeout` are closed.
    pub async fn shutdown(&self) {
        let notified = self
            .broadcast_all(ServerMessage::ServerShutdown {
                message: SHUTDOWN_MESSAGE.to_string(),
            })
            .await;

        // Only the tokens outlive this; the senders drop here.
        let closers: Vec<CancellationToken> = {
            let mut state = self.state.lock();
            state.index = SubscriptionIndex::new();
            state
                .connections
                .drain()
                .map(|(_, conn)| conn.close_token())
                .collect()
        };
        let count = closers.len();

        if count > 0 {
            let grace = self.config.send_timeout();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                for closer in closers {
                    closer.cancel();
                }
            });
        }

        info!(notified = notified, closed = count, "Hub shut down");
    }

    /// Current connection count.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Whether a connection is registered.
    pub fn is_connected(&self, id: &str) -> bool {
        self.state.lock().connections.contains_key(id)
    }

    /// Channels a connection is subscribed to, sorted.
    pub fn subscriptions_of(&self, id: &str) -> Option<Vec<String>> {
        let state = self.state.lock();
        let conn = state.connections.get(id)?;
        let mut channels: Vec<String> = conn.subscriptions().iter().cloned().collect();
        channels.sort();
        Some(channels)
    }

    /// Connections indexed under a channel.
    pub fn subscribers_of(&self, channel: &str) -> Vec<ConnectionId> {
        self.state
            .lock()
            .index
            .subscribers(channel)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Hub statistics.
    pub fn stats(&self) -> HubStats {
        let mut stats = self.stats.read().clone();
        let state = self.state.lock();
        stats.current_connections = state.connections.len();
        stats.active_channels = state.index.channel_count();
        stats.channels = state
            .index
            .channel_counts()
            .map(|(channel, subscribers)| ChannelStats {
                channel: channel.to_string(),
                subscribers,
            })
            .collect();
        stats.channels.sort_by(|a, b| a.channel.cmp(&b.channel));
        stats
    }

    async fn deliver_all(
        &self,
        recipients: Vec<(ConnectionId, mpsc::Sender<Frame>)>,
        frame: Frame,
    ) -> usize {
        let timeout = self.config.send_timeout();
        let results = join_all(recipients.into_iter().map(|(id, sender)| {
            let frame = frame.clone();
            async move {
                let result = deliver(&sender, frame, timeout).await;
                (id, result)
            }
        }))
        .await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => self.evict(&id, &e),
            }
        }
        delivered
    }

    /// Remove a connection whose transport failed.
    fn evict(&self, id: &str, reason: &RealtimeError) {
        warn!(connection_id = %id, error = %reason, "Send failed, removing connection");
        if self.remove(id) {
            self.stats.write().total_evictions += 1;
        }
    }

    /// Whether every connection's subscription set mirrors the index.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        let forward = state.connections.values().all(|conn| {
            conn.subscriptions()
                .iter()
                .all(|channel| state.index.contains(channel, &conn.id))
        });
        let backward = state.index.entries().all(|(channel, id)| {
            state
                .connections
                .get(id)
                .is_some_and(|conn| conn.subscriptions().contains(channel))
        });
        forward && backward
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubConfig::default(), Arc::new(NoSnapshots))
    }
}

/// Per-channel subscriber count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Channel name.
    pub channel: String,
    /// Number of subscribed connections.
    pub subscribers: usize,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Channels with at least one subscriber.
    pub active_channels: usize,
    /// Subscriber counts per channel.
    pub channels: Vec<ChannelStats>,
    /// Total connections since start.
    pub total_connections: u64,
    /// Total new subscriptions since start.
    pub total_subscriptions: u64,
    /// Total broadcasts that reached at least one subscriber.
    pub total_broadcasts: u64,
    /// Connections removed for send failures or heartbeat timeouts.
    pub total_evictions: u64,
}
