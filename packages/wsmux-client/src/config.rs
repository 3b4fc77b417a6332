//! Client configuration: transport target plus the reconnect/RPC/send-queue
//! defaults from spec.md §6.

use std::time::Duration;

use wsmux_core::FormatRegistry;

/// Configuration for a single client connection.
#[derive(Clone)]
pub struct ClientConfig {
    /// WebSocket URL to dial, e.g. `ws://localhost:3000/ws`.
    pub url: String,
    /// Whether the actor reconnects automatically after transport loss.
    pub auto_reconnect: bool,
    /// Initial reconnect delay (spec.md default: 1s).
    pub reconnect_initial_delay: Duration,
    /// Maximum reconnect delay (spec.md default: 30s).
    pub reconnect_max_delay: Duration,
    /// Default deadline for `ClientHandle::request`.
    pub rpc_timeout: Duration,
    /// Send-queue depth (spec.md default: 1000).
    pub send_queue_depth: usize,
    /// Flush interval (spec.md default: 10ms).
    pub flush_interval: Duration,
    /// Wire formats this client can encode/decode.
    pub formats: FormatRegistry,
    /// Format id used to encode outgoing frames.
    pub format_id: &'static str,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auto_reconnect: true,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(5),
            send_queue_depth: 1000,
            flush_interval: Duration::from_millis(10),
            formats: FormatRegistry::with_defaults(),
            format_id: "json",
        }
    }
}
