//! Per-channel view over a client's message stream.

use crate::message::{Envelope, ServerMessage};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Data published on one channel, with the most recent value kept.
///
/// Both `initial_data` and `update` messages count; acknowledgments and
/// other channels are skipped.
#[derive(Debug)]
pub struct ChannelFeed {
    channel: String,
    messages: broadcast::Receiver<Envelope<ServerMessage>>,
    latest: Option<Value>,
}

impl ChannelFeed {
    pub(crate) fn new(
        channel: String,
        messages: broadcast::Receiver<Envelope<ServerMessage>>,
    ) -> Self {
        Self {
            channel,
            messages,
            latest: None,
        }
    }

    /// Channel this feed follows.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Last data received, if any.
    pub fn latest(&self) -> Option<&Value> {
        self.latest.as_ref()
    }

    /// Wait for the next data on this channel.
    ///
    /// Returns `None` once the client is dropped. Messages missed because
    /// the feed fell behind are skipped.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            let envelope = match self.messages.recv().await {
                Ok(envelope) => envelope,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(channel = %self.channel, skipped = skipped, "Channel feed lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            match envelope.message {
                ServerMessage::InitialData { channel, data }
                | ServerMessage::Update { channel, data }
                    if channel == self.channel =>
                {
                    self.latest = Some(data.clone());
                    return Some(data);
                }
                _ => {}
            }
        }
    }
}
