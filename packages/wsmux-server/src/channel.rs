//! Named pub/sub channels: subscriber sets and ordered publish.
//!
//! Grounded on the same `DashMap`-backed concurrent-registry pattern as
//! `connection.rs`'s `ConnectionTable` (in turn from `network/connection.rs`'s
//! `ConnectionRegistry`), generalized from "connection table" to "named
//! channel table with a subscriber set per entry." Per-channel publish
//! ordering is made a first-class contract (DESIGN.md's Open Question
//! resolution): each channel's subscriber set lives behind its own
//! `parking_lot::Mutex`, and `publish` takes that lock for the full
//! snapshot-and-enqueue span, so two publishes to the same channel can
//! never interleave their delivery order.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::ChannelConfig;
use crate::connection::{ConnectionId, ConnectionTable};

/// Error returned by [`ChannelManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The channel already has `max_subscribers` subscribers.
    #[error("channel subscriber limit reached")]
    ChannelFull,
    /// The connection already has `max_subscriptions_per_connection`
    /// subscriptions.
    #[error("connection subscription limit reached")]
    ConnectionFull,
}

struct Channel {
    subscribers: Mutex<HashSet<ConnectionId>>,
}

impl Channel {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashSet::new()),
        }
    }
}

/// Delivery outcome of a [`ChannelManager::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishResult {
    /// Number of subscribers whose send queue accepted the frame.
    pub delivered: usize,
    /// Number of subscribers whose send queue rejected it (backpressure).
    pub rejected: usize,
}

/// Table of named channels, each with its own subscriber set.
pub struct ChannelManager {
    channels: DashMap<String, Arc<Channel>>,
    config: ChannelConfig,
}

impl ChannelManager {
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            channels: DashMap::new(),
            config,
        }
    }

    /// Idempotently creates a channel, returning whether it was newly
    /// created.
    pub fn create(&self, name: &str) -> bool {
        if self.channels.contains_key(name) {
            return false;
        }
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Channel::new()));
        true
    }

    fn get_or_create(&self, name: &str) -> Option<Arc<Channel>> {
        if let Some(channel) = self.channels.get(name) {
            return Some(Arc::clone(channel.value()));
        }
        if !self.config.auto_create {
            return None;
        }
        Some(Arc::clone(
            self.channels
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Channel::new()))
                .value(),
        ))
    }

    /// Subscribes `conn` to `name`, creating the channel if configured
    /// to auto-create.
    ///
    /// # Errors
    /// Returns [`SubscribeError::ChannelFull`] or
    /// [`SubscribeError::ConnectionFull`] if either limit would be
    /// exceeded. No-ops (returns `Ok`) if already subscribed.
    pub fn subscribe(
        &self,
        connections: &ConnectionTable,
        conn: ConnectionId,
        name: &str,
    ) -> Result<(), SubscribeError> {
        let Some(channel) = self.get_or_create(name) else {
            return Ok(());
        };
        let Some(entry) = connections.get(conn) else {
            return Ok(());
        };

        let mut subscribers = channel.subscribers.lock();
        if subscribers.contains(&conn) {
            return Ok(());
        }
        if subscribers.len() >= self.config.max_subscribers {
            return Err(SubscribeError::ChannelFull);
        }
        {
            let state = entry.state.read();
            if state.subscriptions.len() >= self.config.max_subscriptions_per_connection {
                return Err(SubscribeError::ConnectionFull);
            }
        }

        subscribers.insert(conn);
        drop(subscribers);
        entry.state.write().subscriptions.insert(name.to_string());
        Ok(())
    }

    /// Unsubscribes `conn` from `name`. No-op if either is absent.
    pub fn unsubscribe(&self, connections: &ConnectionTable, conn: ConnectionId, name: &str) {
        if let Some(channel) = self.channels.get(name) {
            channel.subscribers.lock().remove(&conn);
        }
        if let Some(entry) = connections.get(conn) {
            entry.state.write().subscriptions.remove(name);
        }
    }

    /// Removes `conn` from every channel it is subscribed to. Called on
    /// connection close.
    pub fn unsubscribe_all(&self, connections: &ConnectionTable, conn: ConnectionId) {
        let names: Vec<String> = connections
            .get(conn)
            .map(|entry| entry.state.read().subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        for name in names {
            self.unsubscribe(connections, conn, &name);
        }
    }

    /// Enqueues `frame` on every current subscriber's send queue.
    ///
    /// Delivery ordering: the whole snapshot-and-enqueue span runs
    /// under the channel's subscriber-set lock, so two concurrent
    /// `publish` calls on the same channel can never interleave.
    #[must_use]
    pub fn publish(&self, connections: &ConnectionTable, name: &str, frame: &[u8]) -> PublishResult {
        let Some(channel) = self.channels.get(name).map(|c| Arc::clone(c.value())) else {
            return PublishResult::default();
        };

        let subscribers = channel.subscribers.lock();
        let mut result = PublishResult::default();
        for &conn in subscribers.iter() {
            if let Some(entry) = connections.get(conn) {
                match entry.try_send(frame.to_vec()) {
                    Ok(()) => result.delivered += 1,
                    Err(_) => result.rejected += 1,
                }
            }
        }
        result
    }

    /// Unsubscribes every subscriber and removes the channel. Returns
    /// the ids that were subscribed, so the caller can notify them.
    pub fn close(&self, connections: &ConnectionTable, name: &str) -> Vec<ConnectionId> {
        let Some((_, channel)) = self.channels.remove(name) else {
            return Vec::new();
        };
        let ids: Vec<ConnectionId> = channel.subscribers.lock().iter().copied().collect();
        for &id in &ids {
            if let Some(entry) = connections.get(id) {
                entry.state.write().subscriptions.remove(name);
            }
        }
        ids
    }

    /// Number of channels currently tracked.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of subscribers on a channel, or 0 if it doesn't exist.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.channels
            .get(name)
            .map(|c| c.subscribers.lock().len())
            .unwrap_or(0)
    }
}
