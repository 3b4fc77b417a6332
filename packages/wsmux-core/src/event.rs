//! The wire unit above the format layer: `(event-id, payload)`.

use std::borrow::Cow;
use std::fmt;

use crate::value::Value;

/// A namespaced, symbol-like event identifier.
///
/// Reserved ids (`handshake`, `ping`, `pong`, ...) are `'static` and never
/// surfaced to application handlers. User ids are typically owned strings
/// decoded off the wire.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct EventId(Cow<'static, str>);

impl EventId {
    /// Wildcard id: matches every event in the handler registry.
    pub const WILDCARD: &'static str = "*";

    pub const HANDSHAKE: &'static str = "wsmux/handshake";
    pub const PING: &'static str = "wsmux/ping";
    pub const PONG: &'static str = "wsmux/pong";
    pub const SUBSCRIBE: &'static str = "wsmux/subscribe";
    pub const UNSUBSCRIBE: &'static str = "wsmux/unsubscribe";
    pub const PUBLISH: &'static str = "wsmux/publish";
    pub const SUBSCRIPTION_ADDED: &'static str = "wsmux/subscription-added";
    pub const SUBSCRIPTION_REJECTED: &'static str = "wsmux/subscription-rejected";
    pub const CHANNEL_CLOSED: &'static str = "wsmux/channel-closed";
    pub const CLOSE: &'static str = "wsmux/close";

    #[must_use]
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is one of the protocol's reserved, system-level ids.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        matches!(
            self.as_str(),
            Self::HANDSHAKE
                | Self::PING
                | Self::PONG
                | Self::SUBSCRIBE
                | Self::UNSUBSCRIBE
                | Self::PUBLISH
                | Self::SUBSCRIPTION_ADDED
                | Self::SUBSCRIPTION_REJECTED
                | Self::CHANNEL_CLOSED
                | Self::CLOSE
        )
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.as_str() == Self::WILDCARD
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&'static str> for EventId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// The decoded wire unit: an event id paired with an arbitrary payload.
///
/// `payload` is `crate::value::Value` regardless of which wire format
/// decoded it -- every format's decoder normalizes into this shape (see
/// `formats`), so the rest of the runtime (channel manager, handler
/// registry) never needs to know which format a connection negotiated.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub payload: crate::value::Value,
}

impl Event {
    #[must_use]
    pub fn new(id: impl Into<EventId>, payload: crate::value::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Wire representation: `[event-id, payload]`, the same two-element
    /// vector shape every format encodes and decodes.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Keyword(self.id.as_str().to_string()),
            self.payload.clone(),
        ])
    }

    /// Parses a decoded [`Value`] back into an `Event`.
    ///
    /// # Errors
    /// Returns `Err` with a diagnostic reason if `value` is not a
    /// two-element array whose first element is a keyword or string.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Array(mut items) = value else {
            return Err("event frame must be a two-element array".to_string());
        };
        if items.len() != 2 {
            return Err(format!(
                "event frame must have exactly 2 elements, got {}",
                items.len()
            ));
        }
        let payload = items.pop().unwrap();
        let id_value = items.pop().unwrap();
        let id = match id_value {
            Value::Keyword(s) | Value::Str(s) => EventId::new(s),
            other => return Err(format!("event id must be a keyword or string, got {other:?}")),
        };
        Ok(Self { id, payload })
    }
}

/// Reply-correlated wire form: `([event-id, payload], reply-correlation-id)`.
///
/// Used when a sender expects a response keyed by `reply_id` (the RPC
/// convenience in `crate::rpc`).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub event: Event,
    pub reply_id: String,
}
