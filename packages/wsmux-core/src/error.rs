//! Error vocabulary shared by every component. Every type here is a tagged
//! result value -- no component's public surface panics or propagates an
//! exception (see spec §7).

use thiserror::Error;

/// A format failed to decode a frame. Carries the raw bytes so the caller
/// can choose to log-and-drop or close the connection.
#[derive(Debug, Error)]
#[error("decode error ({format}): {reason}")]
pub struct DecodeError {
    pub format: &'static str,
    pub reason: String,
    pub raw: Vec<u8>,
}

/// A value could not be encoded by the connection's chosen wire format.
#[derive(Debug, Error)]
#[error("encode error ({format}): {reason}")]
pub struct EncodeError {
    pub format: &'static str,
    pub reason: String,
}

/// Outcome of a send-queue enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity (non-blocking mode or a blocking
    /// variant's deadline expired before space opened up).
    #[error("queue full")]
    Rejected,
    /// A blocking-with-deadline or async-with-callback enqueue expired
    /// its deadline.
    #[error("enqueue timed out")]
    Timeout,
    /// The queue has been stopped; no further enqueues are accepted.
    #[error("queue closed")]
    Closed,
}

/// Terminal outcome delivered to a one-shot handler (spec §3 invariant 4,
/// §4.3's timeout/close notification).
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// The handler's predicate matched an inbound event.
    Matched(crate::event::Event),
    /// The handler's deadline fired before a match arrived.
    Timeout,
    /// The owning transport closed before the handler matched or timed out.
    Closed,
}
