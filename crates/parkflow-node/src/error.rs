//! Error types for the node.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can stop the node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration sources could not be read or deserialized.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration values are out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] validator::ValidationErrors),

    /// The real-time hub refused its configuration.
    #[error("real-time hub error: {0}")]
    Realtime(#[from] parkflow_realtime::RealtimeError),

    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server failed while running.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
