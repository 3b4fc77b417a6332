//! The RPC convenience: "the entire RPC mechanism on top of the
//! [handler] registry" -- an "on first match" wrapper that registers a
//! one-shot handler for a freshly-minted reply id, with a deadline.
//!
//! No separate pending-RPC table exists; `HandlerRegistry::register_once`
//! already tracks the deadline and guarantees exactly one terminal
//! notification. This module only adds reply-id generation and the
//! request/response correlation shape spec.md's wire format describes.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::HandlerOutcome;
use crate::event::{Event, EventId, Reply};
use crate::handler_registry::{HandlerRegistry, Predicate};

/// Generates a fresh correlation id for an outgoing RPC request.
#[must_use]
pub fn new_reply_id() -> String {
    Uuid::new_v4().to_string()
}

/// Registers the one-shot handler half of an RPC call: `registry` will
/// invoke `on_outcome` exactly once, either when an event whose payload
/// carries `reply_id` under the `"reply-id"` key arrives, or when
/// `timeout` elapses first.
///
/// Callers send the actual request event themselves (the send path
/// differs between client and server); this only wires up the waiting
/// side.
pub fn await_reply(
    registry: &HandlerRegistry,
    reply_id: String,
    timeout: Duration,
    on_outcome: impl FnOnce(HandlerOutcome) + Send + 'static,
) {
    let predicate = Predicate::Custom(Arc::new(move |event: &Event| {
        event
            .payload
            .get("reply-id")
            .and_then(crate::value::Value::as_str)
            == Some(reply_id.as_str())
    }));
    registry.register_once(predicate, timeout, on_outcome);
}

/// Wraps an outgoing event and a correlation id into the reply-expected
/// wire shape spec.md's Data Model describes:
/// `([event-id, payload], reply-correlation-id)`.
#[must_use]
pub fn wrap_request(event: Event, reply_id: String) -> Reply {
    Reply { event, reply_id }
}

/// Wraps a response event so its payload carries the correlation id the
/// original requester is waiting on (matched by [`await_reply`]'s
/// predicate).
#[must_use]
pub fn wrap_response(id: impl Into<EventId>, reply_id: &str, mut payload: crate::value::Value) -> Event {
    if let crate::value::Value::Map(entries) = &mut payload {
        entries.push((
            crate::value::Value::keyword("reply-id"),
            crate::value::Value::str(reply_id),
        ));
        Event::new(id, payload)
    } else {
        Event::new(
            id,
            crate::value::Value::map_from([
                (crate::value::Value::keyword("reply-id"), crate::value::Value::str(reply_id)),
                (crate::value::Value::keyword("value"), payload),
            ]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn await_reply_fires_once_on_matching_reply_id() {
        let registry = HandlerRegistry::new();
        let reply_id = new_reply_id();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let outcomes2 = Arc::clone(&outcomes);
        await_reply(&registry, reply_id.clone(), Duration::from_secs(5), move |outcome| {
            outcomes2.lock().unwrap().push(outcome);
        });

        let response = wrap_response(
            EventId::new("app/eval-result"),
            &reply_id,
            crate::value::Value::Int(3),
        );
        registry.dispatch(&response);

        let got = outcomes.lock().unwrap();
        assert_eq!(got.len(), 1);
        match &got[0] {
            HandlerOutcome::Matched(event) => {
                assert_eq!(event.payload.get("reply-id").and_then(crate::value::Value::as_str), Some(reply_id.as_str()));
            }
            other => panic!("expected Matched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn await_reply_times_out_when_unmatched() {
        let registry = HandlerRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        await_reply(&registry, new_reply_id(), Duration::from_millis(20), move |outcome| {
            let _ = tx.send(outcome);
        });
        let outcome = tokio::time::timeout(Duration::from_millis(500), rx)
            .await
            .expect("should fire")
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Timeout);
    }

    #[tokio::test]
    async fn mismatched_reply_id_never_fires_the_handler() {
        let registry = HandlerRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        await_reply(&registry, new_reply_id(), Duration::from_millis(50), move |outcome| {
            let _ = tx.send(outcome);
        });

        let response = wrap_response(
            EventId::new("app/eval-result"),
            "some-other-reply-id",
            crate::value::Value::Int(3),
        );
        registry.dispatch(&response);

        // The mismatched dispatch must not have fired the handler; only
        // the deadline does.
        let outcome = tokio::time::timeout(Duration::from_millis(500), rx)
            .await
            .expect("deadline should still fire")
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Timeout);
    }
}
