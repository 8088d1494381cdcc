//! Error types for the real-time module.

use thiserror::Error;

/// Errors that can occur in real-time operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Inbound frame is not a valid message envelope.
    #[error("Invalid message format")]
    MalformedMessage(String),

    /// Inbound frame carries a `type` the protocol does not define.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Subscription limit exceeded.
    #[error("subscription limit exceeded: max {0} subscriptions")]
    SubscriptionLimit(usize),

    /// Connection limit exceeded.
    #[error("connection limit exceeded: max {0} connections")]
    ConnectionLimit(usize),

    /// Connection not found.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Send failed or timed out.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// Transport could not be established or broke mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration values that would stall or crash a task.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}
