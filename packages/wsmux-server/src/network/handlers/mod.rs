//! HTTP and WebSocket handler definitions for the wsmux server.

pub mod health;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use websocket::ws_upgrade_handler;

pub use crate::app::AppState;
