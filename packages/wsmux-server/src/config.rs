//! Server-wide configuration: transport/ops settings plus the messaging
//! limits from spec.md §6.
//!
//! Grounded on `network/config.rs`'s `NetworkConfig`/`ConnectionConfig`
//! split (literal `Default` impls, no builder pattern), extended with the
//! channel/heartbeat/RPC/send-queue defaults spec.md's Limits table lists.

use std::path::PathBuf;
use std::time::Duration;

use wsmux_core::formats::FormatRegistry;

/// Top-level server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for an HTTP request to complete.
    pub request_timeout: Duration,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
    /// Channel manager limits.
    pub channel: ChannelConfig,
    /// Heartbeat interval/timeout.
    pub heartbeat: HeartbeatConfig,
    /// Default RPC deadline for server-initiated requests.
    pub rpc_timeout: Duration,
    /// Maximum concurrent connections; upgrades beyond this are rejected.
    pub max_connections: usize,
    /// Whether inbound user events are wrapped in a `ReceivedEnvelope`
    /// before dispatch (spec.md §9's "wrap received events" flag, kept
    /// for compatibility with a predecessor API -- see DESIGN.md).
    pub wrap_received_events: bool,
    /// Wire formats available for negotiation at upgrade time.
    pub formats: FormatRegistry,
    /// Wire format selected when a client does not negotiate one
    /// explicitly.
    pub default_format: &'static str,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            tls: None,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            connection: ConnectionConfig::default(),
            channel: ChannelConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rpc_timeout: Duration::from_secs(5),
            max_connections: 1000,
            wrap_received_events: false,
            formats: FormatRegistry::with_defaults(),
            default_format: "json",
        }
    }
}

/// TLS certificate configuration. No `Default` -- certificate paths have
/// no sensible default.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_cert_path: Option<PathBuf>,
}

/// Per-connection send-queue and frame-size limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Send-queue depth (spec.md default: 1000).
    pub send_queue_depth: usize,
    /// Flush interval (spec.md default: 10 ms).
    pub flush_interval: Duration,
    /// Grace period `stop()` waits for in-flight writes.
    pub stop_grace_period: Duration,
    /// Maximum inbound frame size in bytes (spec.md default: 1 MiB).
    pub max_message_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            send_queue_depth: 1000,
            flush_interval: Duration::from_millis(10),
            stop_grace_period: Duration::from_secs(2),
            max_message_bytes: 1024 * 1024,
        }
    }
}

/// Per-channel and per-connection subscription limits.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Max subscribers per channel (spec.md default: 1000).
    pub max_subscribers: usize,
    /// Max subscriptions per connection (spec.md default: 100).
    pub max_subscriptions_per_connection: usize,
    /// Whether `subscribe` on a non-existent channel auto-creates it.
    pub auto_create: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 1000,
            max_subscriptions_per_connection: 100,
            auto_create: true,
        }
    }
}

/// Heartbeat interval/timeout, validated at construction (spec.md §4.6:
/// both must be `> 0` and `timeout >= 2 * interval`).
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Returned when a [`HeartbeatConfig`] fails its interval/timeout
/// invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("heartbeat config invalid: interval and timeout must be > 0 and timeout >= 2 * interval")]
pub struct HeartbeatConfigError;

impl HeartbeatConfig {
    /// # Errors
    /// Returns [`HeartbeatConfigError`] if `interval` or `timeout` is
    /// zero, or `timeout < 2 * interval`.
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, HeartbeatConfigError> {
        if interval.is_zero() || timeout.is_zero() || timeout < interval * 2 {
            return Err(HeartbeatConfigError);
        }
        Ok(Self { interval, timeout })
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_match_spec_limits() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.connection.send_queue_depth, 1000);
        assert_eq!(config.connection.flush_interval, Duration::from_millis(10));
        assert_eq!(config.connection.max_message_bytes, 1024 * 1024);
        assert_eq!(config.channel.max_subscribers, 1000);
        assert_eq!(config.channel.max_subscriptions_per_connection, 100);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(60));
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert!(!config.wrap_received_events);
    }

    #[test]
    fn heartbeat_config_rejects_timeout_below_double_interval() {
        let err = HeartbeatConfig::new(Duration::from_millis(100), Duration::from_millis(150))
            .unwrap_err();
        assert_eq!(err, HeartbeatConfigError);
    }

    #[test]
    fn heartbeat_config_accepts_exactly_double() {
        let config =
            HeartbeatConfig::new(Duration::from_millis(100), Duration::from_millis(200)).unwrap();
        assert_eq!(config.interval, Duration::from_millis(100));
    }

    #[test]
    fn heartbeat_config_rejects_zero_interval() {
        assert!(HeartbeatConfig::new(Duration::ZERO, Duration::from_secs(1)).is_err());
    }
}
