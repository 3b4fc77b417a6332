//! Connection table: per-connection state plus a lock-free registry.
//!
//! Grounded on `network/connection.rs`'s `ConnectionRegistry` (`DashMap`
//! + `AtomicU64` id counter, a handle type holding the outbound channel
//! and a metadata block). The outbound channel itself is swapped out:
//! the teacher uses a raw bounded `mpsc`, this uses
//! [`wsmux_core::SendQueue`] so a connection gets all three enqueue
//! modes spec.md §4.2 requires, not just `try_send`/`send_timeout`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use wsmux_core::SendQueue;

use crate::config::ConnectionConfig;

/// Unique identifier for a connection, assigned by the [`ConnectionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Error returned by a blocking-mode send to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The send timed out; the send queue stayed full for the whole
    /// deadline.
    Timeout,
    /// `stop()` has already run on this connection's send queue.
    Disconnected,
    /// The send queue is full (non-blocking send only).
    Full,
}

/// Mutable per-connection state: negotiated wire format, subscriptions,
/// and liveness bookkeeping for the heartbeat task.
///
/// Behind a `parking_lot::RwLock` so reads (subscription-set lookups
/// during publish) don't serialize against each other, only against the
/// rarer writes (subscribe/unsubscribe, heartbeat updates).
#[derive(Debug)]
pub struct ConnectionState {
    /// Id of the wire format negotiated at upgrade time.
    pub format_id: &'static str,
    /// Channels this connection is currently subscribed to.
    pub subscriptions: HashSet<String>,
    /// When the connection was accepted.
    pub opened_at: Instant,
    /// Last time any frame was received from this connection.
    pub last_activity: Instant,
    /// Last time a pong was received in response to a ping.
    pub last_pong: Instant,
    /// Total inbound messages received.
    pub messages_received: u64,
    /// Total outbound messages handed to the send queue.
    pub messages_sent: u64,
}

impl ConnectionState {
    fn new(format_id: &'static str) -> Self {
        let now = Instant::now();
        Self {
            format_id,
            subscriptions: HashSet::new(),
            opened_at: now,
            last_activity: now,
            last_pong: now,
            messages_received: 0,
            messages_sent: 0,
        }
    }
}

/// A single registered connection: identity, send queue, and state.
pub struct ConnectionEntry {
    pub id: ConnectionId,
    /// Bounded outbound buffer; the websocket write task owns the flush
    /// loop started over this queue.
    pub send_queue: SendQueue<Vec<u8>>,
    pub state: RwLock<ConnectionState>,
}

impl ConnectionEntry {
    /// Enqueues a frame without blocking.
    ///
    /// # Errors
    /// Returns [`SendError::Full`] if the send queue is at capacity,
    /// [`SendError::Disconnected`] if `stop()` has already run.
    pub fn try_send(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.send_queue.try_enqueue(frame).map_err(|rejected| {
            use wsmux_core::error::EnqueueError;
            match rejected.kind {
                EnqueueError::Rejected => SendError::Full,
                EnqueueError::Closed | EnqueueError::Timeout => SendError::Disconnected,
            }
        })
    }

    /// Enqueues a frame, waiting up to `timeout` for room.
    ///
    /// # Errors
    /// Returns [`SendError::Timeout`] if the deadline expires,
    /// [`SendError::Disconnected`] if the queue is closed.
    pub async fn send_timeout(&self, frame: Vec<u8>, timeout: Duration) -> Result<(), SendError> {
        use wsmux_core::error::EnqueueError;
        self.send_queue
            .enqueue_blocking(frame, timeout)
            .await
            .map_err(|rejected| match rejected.kind {
                EnqueueError::Timeout => SendError::Timeout,
                EnqueueError::Closed | EnqueueError::Rejected => SendError::Disconnected,
            })
    }

    pub fn record_message_received(&self) {
        let mut state = self.state.write();
        state.last_activity = Instant::now();
        state.messages_received += 1;
    }

    pub fn record_pong(&self) {
        let mut state = self.state.write();
        let now = Instant::now();
        state.last_activity = now;
        state.last_pong = now;
    }
}

/// Lock-free registry of active connections, keyed by [`ConnectionId`].
pub struct ConnectionTable {
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
    next_id: AtomicU64,
}

impl ConnectionTable {
    /// Creates an empty table. Ids start at 1; 0 is reserved as "no
    /// connection".
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection and returns its entry.
    #[must_use]
    pub fn register(
        &self,
        config: &ConnectionConfig,
        format_id: &'static str,
    ) -> Arc<ConnectionEntry> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(ConnectionEntry {
            id,
            send_queue: SendQueue::new(config.send_queue_depth),
            state: RwLock::new(ConnectionState::new(format_id)),
        });
        self.connections.insert(id, Arc::clone(&entry));
        entry
    }

    /// Removes and returns a connection, if present.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.connections.remove(&id).map(|(_, entry)| entry)
    }

    /// Looks up a connection by id.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.connections.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Current number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every registered connection.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionEntry>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Removes and returns every connection. Used by graceful shutdown
    /// to drive a final `Close` frame through each send queue.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionEntry>> {
        let keys: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, entry)) = self.connections.remove(&key) {
                out.push(entry);
            }
        }
        out
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    #[test]
    fn ids_start_at_one_and_increment() {
        let table = ConnectionTable::new();
        let a = table.register(&config(), "json");
        let b = table.register(&config(), "json");
        assert_eq!(a.id, ConnectionId(1));
        assert_eq!(b.id, ConnectionId(2));
    }

    #[test]
    fn register_get_remove_round_trip() {
        let table = ConnectionTable::new();
        let entry = table.register(&config(), "json");
        let id = entry.id;
        assert_eq!(table.count(), 1);
        assert!(table.get(id).is_some());
        assert!(table.remove(id).is_some());
        assert_eq!(table.count(), 0);
        assert!(table.remove(id).is_none());
    }

    #[test]
    fn try_send_respects_queue_depth() {
        let cfg = ConnectionConfig {
            send_queue_depth: 1,
            ..ConnectionConfig::default()
        };
        let table = ConnectionTable::new();
        let entry = table.register(&cfg, "json");
        assert!(entry.try_send(vec![1]).is_ok());
        let err = entry.try_send(vec![2]).unwrap_err();
        assert_eq!(err, SendError::Full);
    }

    #[test]
    fn record_message_received_updates_counters() {
        let table = ConnectionTable::new();
        let entry = table.register(&config(), "json");
        entry.record_message_received();
        entry.record_message_received();
        assert_eq!(entry.state.read().messages_received, 2);
    }

    #[test]
    fn record_pong_updates_last_pong() {
        let table = ConnectionTable::new();
        let entry = table.register(&config(), "json");
        let before = entry.state.read().last_pong;
        std::thread::sleep(Duration::from_millis(5));
        entry.record_pong();
        assert!(entry.state.read().last_pong > before);
    }

    #[test]
    fn drain_all_empties_the_table() {
        let table = ConnectionTable::new();
        table.register(&config(), "json");
        table.register(&config(), "json");
        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(table.count(), 0);
    }
}
