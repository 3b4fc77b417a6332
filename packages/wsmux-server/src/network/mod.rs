//! HTTP/WebSocket transport: router assembly, middleware, shutdown, handlers.

pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::{HealthState, ShutdownController};
