//! Channel subscription index.
//!
//! Channels are never declared: the first subscribe creates the entry and
//! the last unsubscribe drops it.

use crate::connection::ConnectionId;
use crate::filter::Filter;
use std::collections::HashMap;

/// Maps channel name to the connections subscribed to it and their filters.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    channels: HashMap<String, HashMap<ConnectionId, Filter>>,
}

impl SubscriptionIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a connection under a channel, replacing any previous filter.
    ///
    /// Returns `true` if the connection was not already subscribed.
    pub fn insert(&mut self, channel: &str, id: &ConnectionId, filter: Filter) -> bool {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(id.clone(), filter)
            .is_none()
    }

    /// Remove a connection from a channel.
    ///
    /// Returns `true` if it was subscribed.
    pub fn remove(&mut self, channel: &str, id: &ConnectionId) -> bool {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return false;
        };

        let removed = subscribers.remove(id).is_some();
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    /// Remove a connection from each of the given channels.
    ///
    /// The caller passes the connection's own subscription set, so cleanup
    /// touches only the channels it was in.
    pub fn remove_all<'a>(&mut self, id: &ConnectionId, channels: impl IntoIterator<Item = &'a String>) {
        for channel in channels {
            self.remove(channel, id);
        }
    }

    /// Subscribers of a channel with their filters.
    pub fn subscribers(&self, channel: &str) -> impl Iterator<Item = (&ConnectionId, &Filter)> {
        self.channels.get(channel).into_iter().flatten()
    }

    /// Whether a connection is indexed under a channel.
    pub fn contains(&self, channel: &str, id: &ConnectionId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|subscribers| subscribers.contains_key(id))
    }

    /// Number of subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, HashMap::len)
    }

    /// Channels with at least one subscriber, with their subscriber counts.
    pub fn channel_counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.channels
            .iter()
            .map(|(channel, subscribers)| (channel.as_str(), subscribers.len()))
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Every `(channel, connection)` pair in the index.
    #[cfg(test)]
    pub(crate) fn entries(&self) -> impl Iterator<Item = (&str, &ConnectionId)> {
        self.channels.iter().flat_map(|(channel, subscribers)| {
            subscribers.keys().map(move |id| (channel.as_str(), id))
        })
    }
}
