//! Process-wide heartbeat sweep: pings idle connections, reaps dead ones.
//!
//! Grounded on the interval-loop-plus-liveness-classification shape used
//! for client-side peer health tracking in the retrieval pack's
//! reactor examples, adapted here to a server-side ping/pong/reap sweep
//! over every registered connection.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use wsmux_core::event::{Event, EventId};
use wsmux_core::value::Value;
use wsmux_core::FormatRegistry;

use crate::config::HeartbeatConfig;
use crate::connection::ConnectionId;
use crate::connection::ConnectionTable;

/// Result of a single heartbeat sweep, surfaced for tests and metrics.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    /// Connections that received a fresh ping this tick.
    pub pinged: Vec<ConnectionId>,
    /// Connections closed for exceeding the heartbeat timeout.
    pub reaped: Vec<ConnectionId>,
}

/// Runs one heartbeat sweep over every connection in `table`.
///
/// For each connection: if `now - last_pong > timeout`, the connection
/// is removed from the table (the caller is expected to also drive the
/// transport-level close with reason `heartbeat-timeout`). Otherwise a
/// `wsmux/ping` event carrying the current time is enqueued.
pub fn sweep(table: &ConnectionTable, formats: &FormatRegistry, config: &HeartbeatConfig) -> SweepResult {
    let mut result = SweepResult::default();
    let now = Instant::now();

    for entry in table.connections() {
        let last_pong = entry.state.read().last_pong;
        if now.saturating_duration_since(last_pong) > config.timeout {
            warn!(conn_id = entry.id.0, "heartbeat timeout, reaping connection");
            table.remove(entry.id);
            result.reaped.push(entry.id);
            continue;
        }

        let format_id = entry.state.read().format_id;
        let Some(format) = formats.get(format_id) else {
            continue;
        };
        let ping = Event::new(EventId::from_static(EventId::PING), ping_payload());
        match format.encode(&ping.to_value()) {
            Ok(frame) => {
                if entry.try_send(frame).is_ok() {
                    debug!(conn_id = entry.id.0, "sent heartbeat ping");
                    result.pinged.push(entry.id);
                }
            }
            Err(err) => warn!(conn_id = entry.id.0, error = %err, "failed to encode ping"),
        }
    }

    result
}

fn ping_payload() -> Value {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Value::Int(millis)
}

/// Spawns the periodic heartbeat task. The returned handle can be
/// aborted on server shutdown.
pub fn spawn(
    table: Arc<ConnectionTable>,
    formats: Arc<FormatRegistry>,
    config: HeartbeatConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&table, &formats, &config);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use std::time::Duration;

    #[test]
    fn sweep_pings_connections_within_timeout() {
        let table = ConnectionTable::new();
        let formats = FormatRegistry::with_defaults();
        let config = HeartbeatConfig::new(Duration::from_secs(30), Duration::from_secs(60)).unwrap();
        table.register(&ConnectionConfig::default(), "json");

        let result = sweep(&table, &formats, &config);
        assert_eq!(result.pinged.len(), 1);
        assert!(result.reaped.is_empty());
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn sweep_reaps_connections_past_timeout() {
        let table = ConnectionTable::new();
        let formats = FormatRegistry::with_defaults();
        let config = HeartbeatConfig::new(Duration::from_millis(10), Duration::from_millis(20)).unwrap();
        let entry = table.register(&ConnectionConfig::default(), "json");
        std::thread::sleep(Duration::from_millis(30));

        let result = sweep(&table, &formats, &config);
        assert_eq!(result.reaped, vec![entry.id]);
        assert_eq!(table.count(), 0);
    }
}
