//! Client connection state machine (spec.md §4.8).
//!
//! The reference implementation watches an atomically-swappable cell;
//! per §9's design note this is re-architected as an owning struct with
//! a mutex guarding a small state record, with transitions reported to
//! the caller explicitly rather than via a general-purpose watch.

use parking_lot::Mutex;

/// One of the six states a client connection can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Initial state; no connection attempt in progress.
    Disconnected,
    /// Transport-level connect in progress.
    Connecting,
    /// Transport open; waiting for the server's handshake event.
    Handshaking,
    /// Handshake received; the connection is live.
    Open,
    /// Transport lost; waiting out the backoff delay before retrying.
    Reconnecting,
    /// Terminal; no further transitions occur.
    Closed,
}

impl ClientState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ClientState::Closed)
    }
}

/// Guards the current state behind a short critical section.
pub struct StateCell {
    inner: Mutex<ClientState>,
}

impl StateCell {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClientState::Disconnected),
        }
    }

    #[must_use]
    pub fn get(&self) -> ClientState {
        *self.inner.lock()
    }

    /// Moves to `to` and returns the state transitioned out of. A
    /// transition out of `Closed` is a no-op -- `Closed` is terminal.
    pub fn transition(&self, to: ClientState) -> ClientState {
        let mut state = self.inner.lock();
        let from = *state;
        if from.is_terminal() {
            return from;
        }
        *state = to;
        from
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(StateCell::new().get(), ClientState::Disconnected);
    }

    #[test]
    fn transition_returns_previous_state() {
        let cell = StateCell::new();
        let prev = cell.transition(ClientState::Connecting);
        assert_eq!(prev, ClientState::Disconnected);
        assert_eq!(cell.get(), ClientState::Connecting);
    }

    #[test]
    fn closed_is_terminal() {
        let cell = StateCell::new();
        cell.transition(ClientState::Closed);
        cell.transition(ClientState::Connecting);
        assert_eq!(cell.get(), ClientState::Closed);
    }
}
