//! Wire protocol shared by the hub and the reconnecting client.
//!
//! Every frame is a JSON object tagged by `type`. Frames are decoded once at
//! the transport boundary into [`ClientCommand`] (client to server) or
//! [`ServerMessage`] (server to client); everything downstream matches on
//! the enum.

use crate::error::RealtimeError;
use crate::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A serialized frame, shared between every recipient of one broadcast.
pub type Frame = Arc<str>;

/// Commands that clients can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Liveness signal; refreshes the connection's heartbeat.
    Ping,
    /// Subscribe to a channel, optionally filtered.
    Subscribe {
        channel: String,
        #[serde(default, skip_serializing_if = "Filter::is_empty")]
        filters: Filter,
    },
    /// Unsubscribe from a channel.
    Unsubscribe { channel: String },
    /// One-off request answered with a `response`.
    Request {
        #[serde(rename = "requestId")]
        request_id: String,
        action: String,
        #[serde(default)]
        params: Value,
    },
}

impl ClientCommand {
    /// Every `type` tag a client may send.
    pub const KINDS: [&'static str; 4] = ["ping", "subscribe", "unsubscribe", "request"];

    /// Decode a raw text frame.
    ///
    /// Distinguishes frames that are not an envelope at all from envelopes
    /// whose `type` is not part of the protocol, so the caller can report
    /// the unrecognized type back to the sender.
    pub fn decode(raw: &str) -> Result<Self, RealtimeError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| RealtimeError::MalformedMessage(e.to_string()))?;

        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => return Err(RealtimeError::UnknownMessageType(other.to_string())),
            None => {
                return Err(RealtimeError::MalformedMessage(
                    "missing `type` field".to_string(),
                ))
            }
        };

        if !Self::KINDS.contains(&kind) {
            return Err(RealtimeError::UnknownMessageType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| RealtimeError::MalformedMessage(e.to_string()))
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent once after accept.
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
        message: String,
    },
    /// Pong response to ping.
    Pong,
    /// Subscription confirmed.
    Subscribed { channel: String },
    /// Unsubscription confirmed.
    Unsubscribed { channel: String },
    /// Current state of a channel, sent once after subscribing.
    InitialData { channel: String, data: Value },
    /// Broadcast payload for a subscribed channel.
    Update { channel: String, data: Value },
    /// Answer to a `request`.
    Response {
        #[serde(rename = "requestId")]
        request_id: String,
        data: Value,
    },
    /// Error message.
    Error { message: String },
    /// Sent to every connection before the server goes away.
    ServerShutdown { message: String },
}

impl ServerMessage {
    /// Channel this message belongs to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            ServerMessage::Subscribed { channel }
            | ServerMessage::Unsubscribed { channel }
            | ServerMessage::InitialData { channel, .. }
            | ServerMessage::Update { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

/// A message plus the time it was constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    /// The tagged message.
    #[serde(flatten)]
    pub message: M,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

impl<M: Serialize> Envelope<M> {
    /// Stamp a message with the current time.
    pub fn new(message: M) -> Self {
        Self {
            message,
            timestamp: now_millis(),
        }
    }

    /// Serialize into a shareable frame.
    pub fn encode(&self) -> Result<Frame, RealtimeError> {
        Ok(serde_json::to_string(self)?.into())
    }
}

impl Envelope<ServerMessage> {
    /// Decode a frame received from the server.
    pub fn decode(raw: &str) -> Result<Self, RealtimeError> {
        serde_json::from_str(raw).map_err(|e| RealtimeError::MalformedMessage(e.to_string()))
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
