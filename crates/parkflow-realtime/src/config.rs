//! Tunables for the hub and the reconnecting client.

use crate::error::RealtimeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Seconds between heartbeat sweeps.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Seconds without a ping before a connection is evicted.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_seconds: u64,
    /// Milliseconds a single send may wait on a full outbound queue.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    /// Outbound frames buffered per connection.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum channel subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,
}

impl HubConfig {
    /// Interval between heartbeat sweeps.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// Age after which a silent connection is evicted.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Upper bound on one per-connection send.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Reject values the hub and heartbeat monitor cannot run with.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.heartbeat_interval_seconds == 0 || self.heartbeat_timeout_seconds == 0 {
            return Err(invalid("heartbeat interval and timeout must be positive"));
        }
        if self.heartbeat_interval_seconds >= self.heartbeat_timeout_seconds {
            return Err(invalid(
                "heartbeat interval must be shorter than the heartbeat timeout",
            ));
        }
        if self.send_timeout_ms == 0 || self.outbound_buffer == 0 {
            return Err(invalid("send timeout and outbound buffer must be positive"));
        }
        if self.max_connections == 0 || self.max_subscriptions_per_connection == 0 {
            return Err(invalid("connection and subscription limits must be positive"));
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval(),
            heartbeat_timeout_seconds: default_heartbeat_timeout(),
            send_timeout_ms: default_send_timeout(),
            outbound_buffer: default_outbound_buffer(),
            max_connections: default_max_connections(),
            max_subscriptions_per_connection: default_max_subscriptions(),
        }
    }
}

/// Reconnecting client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:3001/ws`.
    pub url: String,
    /// Milliseconds to wait before each reconnect attempt.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Seconds between liveness pings while connected.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
}

impl ClientConfig {
    /// Create a config for the given endpoint with default timings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ping_interval_seconds: default_ping_interval(),
        }
    }

    /// Delay before each reconnect attempt.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Interval between liveness pings.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    /// Reject values the client driver cannot run with.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.ping_interval_seconds == 0 {
            return Err(invalid("ping interval must be positive"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> RealtimeError {
    RealtimeError::InvalidConfig(reason.to_string())
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_send_timeout() -> u64 {
    5_000
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_reconnect_delay() -> u64 {
    3_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_ping_interval() -> u64 {
    30
}
