//! wsmux server — `WebSocket` transport, channel fan-out, and heartbeat
//! sweep for the wsmux messaging runtime.

pub mod app;
pub mod channel;
pub mod config;
pub mod connection;
pub mod heartbeat;
pub mod network;

pub use app::{AppState, EventHandler, ReplyFn};
pub use channel::ChannelManager;
pub use config::ServerConfig;
pub use connection::{ConnectionEntry, ConnectionId, ConnectionTable};
pub use network::NetworkModule;
