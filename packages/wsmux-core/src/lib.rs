//! wsmux core -- the wire-format registry, the `Event` wire unit, the
//! bounded send queue, the handler registry, and the RPC convenience
//! built on top of it.
//!
//! Shared by `wsmux-server` and `wsmux-client`: neither transport-side
//! crate re-implements dispatch, backpressure, or RPC correlation, they
//! only wire this crate's primitives to their own accept/read/write
//! paths.

pub mod error;
pub mod event;
pub mod formats;
pub mod handler_registry;
pub mod rpc;
pub mod send_queue;
pub mod value;

pub use error::{DecodeError, EncodeError, EnqueueError, HandlerOutcome};
pub use event::{Event, EventId, Reply};
pub use formats::{FormatRegistry, WireFormat};
pub use handler_registry::{HandlerId, HandlerRegistry, Predicate};
pub use send_queue::{EnqueueRejected, SendQueue, SendQueueStats};
pub use value::Value;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
