//! Shared application state and the application-facing event dispatch
//! contract.
//!
//! Grounded on `network/handlers/mod.rs`'s `AppState` (an axum `State`
//! extractor payload holding `Arc`s to every shared subsystem), extended
//! with the channel manager and the application-supplied event handler
//! spec.md §4.7's read path dispatches to.

use std::sync::Arc;
use std::time::Instant;

use wsmux_core::event::Event;
use wsmux_core::value::Value;

use crate::channel::ChannelManager;
use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionTable};
use crate::network::shutdown::ShutdownController;

/// A one-shot reply channel handed to the application handler alongside
/// an inbound event that carried a `reply-id`.
///
/// Calling [`ReplyFn::send`] encodes `payload` under that `reply-id` and
/// enqueues it back to the originating connection. Dropping it without
/// calling `send` simply means no reply is sent -- there is no implicit
/// timeout notification on the application side (the peer's own
/// `await_reply` deadline handles that).
#[derive(Clone)]
pub struct ReplyFn(Arc<dyn Fn(Value) + Send + Sync>);

impl ReplyFn {
    #[must_use]
    pub fn new(f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn send(&self, payload: Value) {
        (self.0)(payload);
    }
}

/// The application-supplied callback for non-reserved inbound events:
/// `(conn-id, event, reply-fn?)`, per spec.md §4.7's read path.
pub type EventHandler = Arc<dyn Fn(ConnectionId, Event, Option<ReplyFn>) + Send + Sync>;

/// Shared state threaded through every axum handler via `State`
/// extraction.
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionTable>,
    pub channels: Arc<ChannelManager>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<ShutdownController>,
    pub start_time: Instant,
    pub on_event: EventHandler,
}

#[cfg(test)]
#[must_use]
pub fn test_app_state() -> AppState {
    AppState {
        connections: Arc::new(ConnectionTable::new()),
        channels: Arc::new(ChannelManager::new(crate::config::ChannelConfig::default())),
        config: Arc::new(ServerConfig::default()),
        shutdown: Arc::new(ShutdownController::new()),
        start_time: Instant::now(),
        on_event: Arc::new(|_conn_id, _event, _reply| {}),
    }
}
