//! Unifies two dispatch shapes behind one registry: persistent event
//! handlers (fire on every match, stay registered) and one-shot RPC
//! waiters (fire exactly once, with a deadline, then remove themselves).
//!
//! Grounded on the pending-request map pattern in
//! `other_examples/422ce7d9_tobert-hootenanny__crates-hooteproto-src-client.rs.rs`
//! (a `HashMap<Id, PendingRequest>` with a `response_tx` and a deadline),
//! generalized to predicate matching (spec §4.3) instead of exact-id-only
//! matching, and to the two-shape (persistent/once) registry spec.md asks
//! for.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::HandlerOutcome;
use crate::event::{Event, EventId};

/// Identifies a registered handler for later `unregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// What an inbound event is matched against.
#[derive(Clone)]
pub enum Predicate {
    /// Matches exactly one event id.
    Exact(EventId),
    /// Matches every event (`EventId::WILDCARD`).
    Wildcard,
    /// Matches via an arbitrary predicate over the whole event.
    Custom(Arc<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl Predicate {
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Predicate::Exact(id) => &event.id == id,
            Predicate::Wildcard => true,
            Predicate::Custom(f) => f(event),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Exact(id) => write!(f, "Predicate::Exact({id:?})"),
            Predicate::Wildcard => write!(f, "Predicate::Wildcard"),
            Predicate::Custom(_) => write!(f, "Predicate::Custom(..)"),
        }
    }
}

type OnceCallback = Box<dyn FnOnce(HandlerOutcome) + Send>;
type PersistentCallback = Arc<dyn Fn(Event) + Send + Sync>;

enum Callback {
    Persistent(PersistentCallback),
    /// `None` once fired, guarding exactly-once delivery against a race
    /// between a matching dispatch and the deadline timer.
    Once(StdMutex<Option<OnceCallback>>),
}

struct HandlerEntry {
    id: HandlerId,
    predicate: Predicate,
    callback: Callback,
}

impl HandlerEntry {
    /// Takes the once-callback if still armed. No-op (and returns
    /// `false`) for persistent handlers or an already-fired once handler.
    fn claim_once(&self) -> Option<OnceCallback> {
        match &self.callback {
            Callback::Once(cell) => cell.lock().unwrap().take(),
            Callback::Persistent(_) => None,
        }
    }
}

/// A registry of event handlers, both persistent and one-shot.
pub struct HandlerRegistry {
    next_id: AtomicU64,
    // `Arc`-wrapped so a `register_once` deadline task can prune its own
    // expired entry without needing shared ownership of the registry
    // itself.
    handlers: Arc<Mutex<Vec<Arc<HandlerEntry>>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn allocate_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a handler that fires on every matching event and stays
    /// registered until explicitly [`unregister`](Self::unregister)ed.
    pub fn register(
        &self,
        predicate: Predicate,
        callback: impl Fn(Event) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.allocate_id();
        let entry = Arc::new(HandlerEntry {
            id,
            predicate,
            callback: Callback::Persistent(Arc::new(callback)),
        });
        self.handlers.lock().push(entry);
        id
    }

    /// Registers a handler that fires exactly once: on the first
    /// matching event (`Matched`), on `timeout` elapsing first
    /// (`Timeout`), or on [`close_all`](Self::close_all) running first
    /// (`Closed`). Removes itself from the registry after firing.
    pub fn register_once(
        &self,
        predicate: Predicate,
        timeout: Duration,
        callback: impl FnOnce(HandlerOutcome) + Send + 'static,
    ) -> HandlerId {
        let id = self.allocate_id();
        let entry = Arc::new(HandlerEntry {
            id,
            predicate,
            callback: Callback::Once(StdMutex::new(Some(Box::new(callback)))),
        });
        self.handlers.lock().push(Arc::clone(&entry));

        let handlers = Arc::clone(&self.handlers);
        tokio::spawn(async move {
            tokio::time::sleep_until(Instant::now() + timeout).await;
            if let Some(cb) = entry.claim_once() {
                cb(HandlerOutcome::Timeout);
            }
            handlers.lock().retain(|h| h.id != id);
        });

        id
    }

    /// Removes a handler before it has fired. Returns `false` if it was
    /// never registered or already fired/removed.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        handlers.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches `event` to every matching handler, in registration
    /// order. Takes a snapshot of the registered handlers first, so a
    /// handler registered or removed mid-dispatch (e.g. from inside
    /// another handler's callback) never affects the current pass.
    pub fn dispatch(&self, event: &Event) {
        let snapshot = self.handlers.lock().clone();
        let mut fired_once = Vec::new();
        for handler in &snapshot {
            if !handler.predicate.matches(event) {
                continue;
            }
            match &handler.callback {
                Callback::Persistent(f) => f(event.clone()),
                Callback::Once(_) => {
                    if let Some(cb) = handler.claim_once() {
                        cb(HandlerOutcome::Matched(event.clone()));
                        fired_once.push(handler.id);
                    }
                }
            }
        }
        if !fired_once.is_empty() {
            let mut handlers = self.handlers.lock();
            handlers.retain(|h| !fired_once.contains(&h.id));
        }
    }

    /// Fires `Closed` to every outstanding once-handler and clears the
    /// registry. Called when the owning connection or client tears down.
    pub fn close_all(&self) {
        let snapshot = std::mem::take(&mut *self.handlers.lock());
        for handler in snapshot {
            if let Some(cb) = handler.claim_once() {
                cb(HandlerOutcome::Closed);
            }
        }
    }
}
