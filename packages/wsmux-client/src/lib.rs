//! wsmux client -- a reconnecting `WebSocket` client built on the same
//! wire format, send queue, handler registry, and RPC convenience as
//! `wsmux-server`.

pub mod actor;
pub mod client;
pub mod config;
pub mod reconnect;
pub mod state;

pub use client::{ClientHandle, SendError};
pub use config::ClientConfig;
pub use state::ClientState;
