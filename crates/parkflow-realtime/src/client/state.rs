//! Reconnection state machine.
//!
//! Pure bookkeeping: every transition returns what the caller has to send,
//! and the driver in [`super`] performs the I/O.

use crate::filter::Filter;
use crate::message::ClientCommand;
use serde::Serialize;
use std::collections::BTreeMap;

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Idle; nothing happens until `connect`.
    Disconnected,
    /// Establishing the transport.
    Connecting,
    /// Transport open, pings running.
    Connected,
    /// Waiting for the retry timer after a failure.
    Reconnecting,
    /// Gave up after too many attempts; waits for an explicit `connect`.
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status plus the consecutive failed attempts behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    /// Current status.
    pub status: ConnectionStatus,
    /// Failed reconnect attempts since the last successful connect.
    pub attempt: u32,
}

/// What a transport loss leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A retry should be scheduled.
    Retry,
    /// Attempts are exhausted.
    GaveUp,
    /// The loss happened outside a connection attempt and changes nothing.
    Ignored,
}

/// Client-side connection state.
#[derive(Debug, Clone)]
pub struct ClientState {
    status: ConnectionStatus,
    attempt: u32,
    max_attempts: u32,
    desired: BTreeMap<String, Filter>,
}

impl ClientState {
    /// Create a disconnected state allowing `max_attempts` retries.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            max_attempts,
            desired: BTreeMap::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Consecutive failed attempts.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Status and attempt together.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            status: self.status,
            attempt: self.attempt,
        }
    }

    /// Channels the application wants, independent of the transport.
    pub fn desired_subscriptions(&self) -> &BTreeMap<String, Filter> {
        &self.desired
    }

    /// Start connecting.
    ///
    /// From `disconnected` or `failed` this starts a fresh cycle with the
    /// attempt counter reset; from `reconnecting` it skips the remaining
    /// delay. Returns `false` when a connection is already in progress.
    pub fn connect(&mut self) -> bool {
        match self.status {
            ConnectionStatus::Disconnected | ConnectionStatus::Failed => {
                self.attempt = 0;
                self.status = ConnectionStatus::Connecting;
                true
            }
            ConnectionStatus::Reconnecting => {
                self.status = ConnectionStatus::Connecting;
                true
            }
            ConnectionStatus::Connecting | ConnectionStatus::Connected => false,
        }
    }

    /// The transport opened. Returns the subscribe commands that restore
    /// every desired subscription.
    pub fn on_open(&mut self) -> Vec<ClientCommand> {
        if self.status != ConnectionStatus::Connecting {
            return Vec::new();
        }

        self.status = ConnectionStatus::Connected;
        self.attempt = 0;
        self.desired
            .iter()
            .map(|(channel, filters)| ClientCommand::Subscribe {
                channel: channel.clone(),
                filters: filters.clone(),
            })
            .collect()
    }

    /// The transport closed or failed to open.
    pub fn on_closed(&mut self) -> CloseOutcome {
        match self.status {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                if self.attempt < self.max_attempts {
                    self.attempt += 1;
                    self.status = ConnectionStatus::Reconnecting;
                    CloseOutcome::Retry
                } else {
                    self.status = ConnectionStatus::Failed;
                    CloseOutcome::GaveUp
                }
            }
            _ => CloseOutcome::Ignored,
        }
    }

    /// The retry timer fired. Returns `false` if no retry was pending.
    pub fn on_retry(&mut self) -> bool {
        if self.status != ConnectionStatus::Reconnecting {
            return false;
        }
        self.status = ConnectionStatus::Connecting;
        true
    }

    /// Explicit disconnect by the application.
    pub fn disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.attempt = 0;
    }

    /// Record a wanted subscription. Returns the command to send now if the
    /// transport is open.
    pub fn subscribe(&mut self, channel: String, filters: Filter) -> Option<ClientCommand> {
        self.desired.insert(channel.clone(), filters.clone());
        self.live(ClientCommand::Subscribe { channel, filters })
    }

    /// Forget a subscription. Returns the command to send now if the
    /// transport is open.
    pub fn unsubscribe(&mut self, channel: &str) -> Option<ClientCommand> {
        self.desired.remove(channel);
        self.live(ClientCommand::Unsubscribe {
            channel: channel.to_string(),
        })
    }

    fn live(&self, command: ClientCommand) -> Option<ClientCommand> {
        (self.status == ConnectionStatus::Connected).then_some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_retry_cycle_until_failed() {
        let mut state = ClientState::new(3);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);

        assert!(state.connect());
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        state.on_open();
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.attempt(), 0);

        for expected in 1..=3 {
            assert_eq!(state.on_closed(), CloseOutcome::Retry);
            assert_eq!(state.status(), ConnectionStatus::Reconnecting);
            assert_eq!(state.attempt(), expected);
            assert!(state.on_retry());
            assert_eq!(state.status(), ConnectionStatus::Connecting);
        }

        assert_eq!(state.on_closed(), CloseOutcome::GaveUp);
        assert_eq!(state.status(), ConnectionStatus::Failed);
        assert_eq!(state.attempt(), 3);

        // Failed is terminal until the application asks again.
        assert!(!state.on_retry());
        assert_eq!(state.on_closed(), CloseOutcome::Ignored);
        assert_eq!(state.status(), ConnectionStatus::Failed);

        assert!(state.connect());
        assert_eq!(state.status(), ConnectionStatus::Connecting);
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let mut state = ClientState::new(5);
        state.connect();
        state.on_closed();
        state.on_retry();
        state.on_closed();
        assert_eq!(state.attempt(), 2);

        state.on_retry();
        state.on_open();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_zero_attempts_fails_immediately() {
        let mut state = ClientState::new(0);
        state.connect();
        assert_eq!(state.on_closed(), CloseOutcome::GaveUp);
        assert_eq!(state.status(), ConnectionStatus::Failed);
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let mut state = ClientState::new(3);
        state.connect();
        state.on_closed();
        assert_eq!(state.status(), ConnectionStatus::Reconnecting);

        state.disconnect();
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert!(!state.on_retry());
        assert_eq!(state.on_closed(), CloseOutcome::Ignored);
    }

    #[test]
    fn test_connect_while_connecting_is_noop() {
        let mut state = ClientState::new(3);
        assert!(state.connect());
        assert!(!state.connect());
        state.on_open();
        assert!(!state.connect());
    }

    #[test]
    fn test_desired_subscriptions_survive_reconnects() {
        let mut state = ClientState::new(3);
        assert!(state
            .subscribe("occupancy".to_string(), Filter::new().with("lotId", "lot-001"))
            .is_none());

        state.connect();
        let commands = state.on_open();
        assert_eq!(
            commands,
            vec![ClientCommand::Subscribe {
                channel: "occupancy".to_string(),
                filters: Filter::new().with("lotId", "lot-001"),
            }]
        );

        assert!(state.subscribe("alerts".to_string(), Filter::new()).is_some());

        state.on_closed();
        state.on_retry();
        let channels: Vec<String> = state
            .on_open()
            .into_iter()
            .filter_map(|cmd| match cmd {
                ClientCommand::Subscribe { channel, .. } => Some(channel),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec!["alerts", "occupancy"]);
    }

    #[test]
    fn test_unsubscribe_forgets_channel() {
        let mut state = ClientState::new(3);
        state.connect();
        state.on_open();
        state.subscribe("alerts".to_string(), Filter::new());

        assert_eq!(
            state.unsubscribe("alerts"),
            Some(ClientCommand::Unsubscribe {
                channel: "alerts".to_string()
            })
        );
        assert!(state.desired_subscriptions().is_empty());

        state.on_closed();
        state.on_retry();
        assert!(state.on_open().is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Failed).unwrap(),
            "\"failed\""
        );
    }
}
