//! Reconnecting real-time client.
//!
//! [`RealtimeClient`] is a cheap handle over a background driver task. The
//! driver owns the transport and a [`ClientState`]; the handle talks to it
//! over a control channel and observes it through a `watch` (status) and a
//! `broadcast` (incoming messages).
//!
//! While connected the driver pings every `ping_interval`. On an unexpected
//! close it waits `reconnect_delay` and tries again, up to
//! `max_reconnect_attempts` consecutive failures, then parks in
//! [`ConnectionStatus::Failed`] until [`RealtimeClient::connect`] is called.
//! Subscriptions are remembered and replayed after every reconnect.

mod feed;
mod state;
mod transport;

pub use feed::ChannelFeed;
pub use state::{ClientSnapshot, ClientState, CloseOutcome, ConnectionStatus};
pub use transport::{Connector, FrameSink, FrameStream, Transport, WsConnector};

use crate::config::ClientConfig;
use crate::error::RealtimeError;
use crate::filter::Filter;
use crate::message::{ClientCommand, Envelope, ServerMessage};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Capacity of the incoming message fan-out.
const MESSAGE_BUFFER: usize = 256;

#[derive(Debug)]
enum Control {
    Connect,
    Disconnect,
    Subscribe { channel: String, filters: Filter },
    Unsubscribe { channel: String },
    Send(ClientCommand),
}

/// Handle to a reconnecting client.
///
/// Dropping the handle stops the driver and closes the transport.
#[derive(Debug)]
pub struct RealtimeClient {
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<ClientSnapshot>,
    messages: broadcast::Sender<Envelope<ServerMessage>>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Start a client that connects over WebSocket to `config.url`.
    ///
    /// The client starts disconnected; call [`connect`](Self::connect).
    pub fn websocket(config: ClientConfig) -> Result<Self, RealtimeError> {
        let connector = Arc::new(WsConnector::new(config.url.clone()));
        Self::spawn(config, connector)
    }

    /// Start a client over an arbitrary transport.
    ///
    /// Fails if `config` is unusable, before any task is started.
    pub fn spawn(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, RealtimeError> {
        config.validate()?;
        let state = ClientState::new(config.max_reconnect_attempts);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(state.snapshot());
        let (messages, _) = broadcast::channel(MESSAGE_BUFFER);

        let driver = Driver {
            config,
            connector,
            state,
            control: control_rx,
            status: status_tx,
            messages: messages.clone(),
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            control: control_tx,
            status: status_rx,
            messages,
            task,
        })
    }

    /// Connect, or retry right away if a reconnect is pending.
    pub fn connect(&self) {
        self.control(Control::Connect);
    }

    /// Close the transport and stop reconnecting.
    pub fn disconnect(&self) {
        self.control(Control::Disconnect);
    }

    /// Subscribe to a channel. Remembered across reconnects.
    pub fn subscribe(&self, channel: impl Into<String>, filters: Filter) {
        self.control(Control::Subscribe {
            channel: channel.into(),
            filters,
        });
    }

    /// Subscribe to a channel and follow its data.
    pub fn channel(&self, channel: impl Into<String>, filters: Filter) -> ChannelFeed {
        let channel = channel.into();
        let feed = ChannelFeed::new(channel.clone(), self.messages());
        self.subscribe(channel, filters);
        feed
    }

    /// Unsubscribe from a channel.
    pub fn unsubscribe(&self, channel: impl Into<String>) {
        self.control(Control::Unsubscribe {
            channel: channel.into(),
        });
    }

    /// Send a `request`. Returns its id, or `None` when not connected.
    pub fn request(&self, action: impl Into<String>, params: Value) -> Option<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let sent = self.send(ClientCommand::Request {
            request_id: request_id.clone(),
            action: action.into(),
            params,
        });
        sent.then_some(request_id)
    }

    /// Send a raw command. Returns `false` when not connected; nothing is
    /// queued for later.
    pub fn send(&self, command: ClientCommand) -> bool {
        if self.status().status != ConnectionStatus::Connected {
            return false;
        }
        self.control.send(Control::Send(command)).is_ok()
    }

    /// Current status.
    pub fn status(&self) -> ClientSnapshot {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn status_changes(&self) -> watch::Receiver<ClientSnapshot> {
        self.status.clone()
    }

    /// Receive every message from the server from now on.
    pub fn messages(&self) -> broadcast::Receiver<Envelope<ServerMessage>> {
        self.messages.subscribe()
    }

    fn control(&self, control: Control) {
        if self.control.send(control).is_err() {
            warn!("Realtime client driver is gone");
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Flow {
    Continue,
    Exit,
}

struct Driver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: ClientState,
    control: mpsc::UnboundedReceiver<Control>,
    status: watch::Sender<ClientSnapshot>,
    messages: broadcast::Sender<Envelope<ServerMessage>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let flow = match self.state.status() {
                ConnectionStatus::Connecting => self.establish().await,
                ConnectionStatus::Reconnecting => self.wait_for_retry().await,
                // `Connected` never outlives `session`.
                ConnectionStatus::Disconnected
                | ConnectionStatus::Failed
                | ConnectionStatus::Connected => self.idle().await,
            };
            self.publish();

            if let Flow::Exit = flow {
                break;
            }
        }
        debug!("Realtime client driver stopped");
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        self.status.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    /// Handle a control message while no transport is open.
    fn apply_offline(&mut self, control: Control) {
        match control {
            Control::Connect => {
                self.state.connect();
            }
            Control::Disconnect => self.state.disconnect(),
            Control::Subscribe { channel, filters } => {
                self.state.subscribe(channel, filters);
            }
            Control::Unsubscribe { channel } => {
                self.state.unsubscribe(&channel);
            }
            Control::Send(command) => {
                debug!(?command, "Not connected, dropping command");
            }
        }
    }

    async fn idle(&mut self) -> Flow {
        match self.control.recv().await {
            Some(control) => {
                self.apply_offline(control);
                Flow::Continue
            }
            None => Flow::Exit,
        }
    }

    async fn wait_for_retry(&mut self) -> Flow {
        let delay = self.config.reconnect_delay();
        info!(
            attempt = self.state.attempt(),
            max_attempts = self.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let retry = time::sleep(delay);
        tokio::pin!(retry);

        loop {
            tokio::select! {
                _ = &mut retry => {
                    self.state.on_retry();
                    return Flow::Continue;
                }
                control = self.control.recv() => {
                    let Some(control) = control else {
                        return Flow::Exit;
                    };
                    self.apply_offline(control);
                    if self.state.status() != ConnectionStatus::Reconnecting {
                        return Flow::Continue;
                    }
                }
            }
        }
    }

    async fn establish(&mut self) -> Flow {
        let connector = self.connector.clone();
        let connecting = connector.connect();
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(transport) => self.session(transport).await,
                        Err(e) => {
                            warn!(url = %self.config.url, error = %e, "Connection attempt failed");
                            self.closed();
                            Flow::Continue
                        }
                    };
                }
                control = self.control.recv() => {
                    let Some(control) = control else {
                        return Flow::Exit;
                    };
                    self.apply_offline(control);
                    if self.state.status() != ConnectionStatus::Connecting {
                        return Flow::Continue;
                    }
                }
            }
        }
    }

    async fn session(&mut self, transport: Transport) -> Flow {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        let resubscribe = self.state.on_open();
        self.publish();
        info!(
            url = %self.config.url,
            subscriptions = resubscribe.len(),
            "Connected to real-time service"
        );

        for command in resubscribe {
            if let Err(e) = send_command(&mut sink, command).await {
                warn!(error = %e, "Failed to restore subscription");
                self.closed();
                return Flow::Continue;
            }
        }

        let every = self.config.ping_interval();
        let mut ping = time::interval_at(Instant::now() + every, every);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error");
                        break;
                    }
                    None => {
                        info!("Server closed the connection");
                        break;
                    }
                },
                _ = ping.tick() => {
                    if let Err(e) = send_command(&mut sink, ClientCommand::Ping).await {
                        warn!(error = %e, "Failed to send ping");
                        break;
                    }
                }
                control = self.control.recv() => {
                    let outgoing = match control {
                        None => {
                            let _ = sink.close().await;
                            self.state.disconnect();
                            return Flow::Exit;
                        }
                        Some(Control::Disconnect) => {
                            let _ = sink.close().await;
                            self.state.disconnect();
                            info!("Disconnected");
                            return Flow::Continue;
                        }
                        Some(Control::Connect) => None,
                        Some(Control::Subscribe { channel, filters }) => {
                            self.state.subscribe(channel, filters)
                        }
                        Some(Control::Unsubscribe { channel }) => self.state.unsubscribe(&channel),
                        Some(Control::Send(command)) => Some(command),
                    };

                    if let Some(command) = outgoing {
                        if let Err(e) = send_command(&mut sink, command).await {
                            warn!(error = %e, "Failed to send command");
                            break;
                        }
                    }
                }
            }
        }

        self.closed();
        Flow::Continue
    }

    fn closed(&mut self) {
        if self.state.on_closed() == CloseOutcome::GaveUp {
            warn!(
                attempts = self.state.attempt(),
                "Giving up on the real-time service"
            );
        }
    }

    fn dispatch(&self, text: &str) {
        match Envelope::<ServerMessage>::decode(text) {
            Ok(envelope) => {
                // No receivers is fine.
                let _ = self.messages.send(envelope);
            }
            Err(e) => warn!(error = %e, "Dropping unparseable server frame"),
        }
    }
}

async fn send_command(sink: &mut FrameSink, command: ClientCommand) -> Result<(), RealtimeError> {
    let frame = Envelope::new(command).encode()?;
    sink.send(frame.to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Server side of one mock session.
    struct ServerEnd {
        from_client: fmpsc::UnboundedReceiver<String>,
        to_client: fmpsc::UnboundedSender<Result<String, RealtimeError>>,
    }

    impl ServerEnd {
        async fn next_command(&mut self) -> ClientCommand {
            let raw = self.from_client.next().await.unwrap();
            ClientCommand::decode(&raw).unwrap()
        }

        fn push(&self, message: ServerMessage) {
            let frame = Envelope::new(message).encode().unwrap();
            self.to_client.unbounded_send(Ok(frame.to_string())).unwrap();
        }
    }

    struct MockConnector {
        accept: AtomicBool,
        attempts: AtomicUsize,
        sessions: mpsc::UnboundedSender<ServerEnd>,
    }

    impl MockConnector {
        fn new(accept: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
            let (sessions, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                accept: AtomicBool::new(accept),
                attempts: AtomicUsize::new(0),
                sessions,
            });
            (connector, rx)
        }
    }

    #[async_trait::async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Transport, RealtimeError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.accept.load(Ordering::SeqCst) {
                return Err(RealtimeError::Transport("connection refused".to_string()));
            }

            let (client_tx, from_client) = fmpsc::unbounded();
            let (to_client, client_rx) = fmpsc::unbounded();
            let _ = self.sessions.send(ServerEnd {
                from_client,
                to_client,
            });

            Ok(Transport {
                sink: Box::pin(client_tx.sink_map_err(|_| RealtimeError::ChannelClosed)),
                stream: Box::pin(client_rx),
            })
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            max_reconnect_attempts: 2,
            ..ClientConfig::new("ws://test/ws")
        }
    }

    async fn wait_for(client: &RealtimeClient, status: ConnectionStatus) -> ClientSnapshot {
        let mut changes = client.status_changes();
        let snapshot = *changes.wait_for(|s| s.status == status).await.unwrap();
        snapshot
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_reconnect() {
        let (connector, mut sessions) = MockConnector::new(true);
        let client = RealtimeClient::spawn(config(), connector.clone()).unwrap();

        client.connect();
        let mut server = sessions.recv().await.unwrap();
        wait_for(&client, ConnectionStatus::Connected).await;

        client.subscribe("occupancy", Filter::new().with("lotId", "lot-001"));
        assert_eq!(
            server.next_command().await,
            ClientCommand::Subscribe {
                channel: "occupancy".to_string(),
                filters: Filter::new().with("lotId", "lot-001"),
            }
        );

        // Server goes away.
        drop(server);
        let snapshot = wait_for(&client, ConnectionStatus::Reconnecting).await;
        assert_eq!(snapshot.attempt, 1);

        let mut server = sessions.recv().await.unwrap();
        let snapshot = wait_for(&client, ConnectionStatus::Connected).await;
        assert_eq!(snapshot.attempt, 0);
        assert_eq!(
            server.next_command().await,
            ClientCommand::Subscribe {
                channel: "occupancy".to_string(),
                filters: Filter::new().with("lotId", "lot-001"),
            }
        );
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (connector, mut sessions) = MockConnector::new(false);
        let client = RealtimeClient::spawn(config(), connector.clone()).unwrap();

        client.connect();
        let snapshot = wait_for(&client, ConnectionStatus::Failed).await;
        assert_eq!(snapshot.attempt, 2);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

        // Nothing happens on its own once failed.
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

        connector.accept.store(true, Ordering::SeqCst);
        client.connect();
        let _server = sessions.recv().await.unwrap();
        let snapshot = wait_for(&client, ConnectionStatus::Connected).await;
        assert_eq!(snapshot.attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_retry() {
        let (connector, _sessions) = MockConnector::new(false);
        let client = RealtimeClient::spawn(config(), connector.clone()).unwrap();

        client.connect();
        wait_for(&client, ConnectionStatus::Reconnecting).await;

        client.disconnect();
        let snapshot = wait_for(&client, ConnectionStatus::Disconnected).await;
        assert_eq!(snapshot.attempt, 0);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_while_connected() {
        let (connector, mut sessions) = MockConnector::new(true);
        let client = RealtimeClient::spawn(config(), connector).unwrap();

        client.connect();
        let mut server = sessions.recv().await.unwrap();
        wait_for(&client, ConnectionStatus::Connected).await;

        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(server.next_command().await, ClientCommand::Ping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_server_messages() {
        let (connector, mut sessions) = MockConnector::new(true);
        let client = RealtimeClient::spawn(config(), connector).unwrap();
        let mut messages = client.messages();

        client.connect();
        let server = sessions.recv().await.unwrap();
        server.push(ServerMessage::Update {
            channel: "occupancy".to_string(),
            data: json!({"lotId": "lot-001", "occupancy": 42}),
        });

        let envelope = messages.recv().await.unwrap();
        assert_eq!(envelope.message.channel(), Some("occupancy"));
        assert!(envelope.timestamp > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_feed_keeps_latest_for_its_channel() {
        let (connector, mut sessions) = MockConnector::new(true);
        let client = RealtimeClient::spawn(config(), connector).unwrap();
        let mut feed = client.channel("occupancy", Filter::new().with("lotId", "lot-001"));
        assert_eq!(feed.channel(), "occupancy");
        assert!(feed.latest().is_none());

        client.connect();
        let mut server = sessions.recv().await.unwrap();
        assert!(matches!(
            server.next_command().await,
            ClientCommand::Subscribe { ref channel, .. } if channel == "occupancy"
        ));

        server.push(ServerMessage::Subscribed {
            channel: "occupancy".to_string(),
        });
        server.push(ServerMessage::InitialData {
            channel: "occupancy".to_string(),
            data: json!({"lotId": "lot-001", "occupancy": 40}),
        });
        server.push(ServerMessage::Update {
            channel: "alerts".to_string(),
            data: json!({"level": "critical"}),
        });
        server.push(ServerMessage::Update {
            channel: "occupancy".to_string(),
            data: json!({"lotId": "lot-001", "occupancy": 41}),
        });

        assert_eq!(feed.next().await.unwrap()["occupancy"], 40);
        assert_eq!(feed.next().await.unwrap()["occupancy"], 41);
        assert_eq!(feed.latest().unwrap()["occupancy"], 41);
    }

    #[tokio::test]
    async fn test_zero_ping_interval_rejected() {
        let (connector, _sessions) = MockConnector::new(true);
        let config = ClientConfig {
            ping_interval_seconds: 0,
            ..config()
        };
        assert!(matches!(
            RealtimeClient::spawn(config, connector),
            Err(RealtimeError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connection() {
        let (connector, mut sessions) = MockConnector::new(true);
        let client = RealtimeClient::spawn(config(), connector).unwrap();

        assert!(!client.send(ClientCommand::Ping));
        assert!(client.request("snapshot", json!({})).is_none());

        client.connect();
        let mut server = sessions.recv().await.unwrap();
        wait_for(&client, ConnectionStatus::Connected).await;

        let request_id = client
            .request("snapshot", json!({"channel": "bookings"}))
            .unwrap();
        match server.next_command().await {
            ClientCommand::Request {
                request_id: sent,
                action,
                ..
            } => {
                assert_eq!(sent, request_id);
                assert_eq!(action, "snapshot");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
