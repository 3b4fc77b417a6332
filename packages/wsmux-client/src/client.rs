//! The public, `Clone`-able handle applications hold. Never exposes the
//! transport stream or the actor's command channel directly -- every
//! operation goes through `send_queue` (for writes) or the actor's
//! command channel (for `close`), per spec.md §9's callback-based
//! concurrency contract.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use wsmux_core::event::{Event, EventId};
use wsmux_core::value::Value;
use wsmux_core::{rpc, EnqueueError, HandlerOutcome, HandlerRegistry, Predicate, SendQueue, WireFormat};

use crate::actor::{ActorCommand, ClientActor};
use crate::config::ClientConfig;
use crate::state::{ClientState, StateCell};

/// Error returned by a send-path operation on [`ClientHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("send queue full")]
    Full,
    #[error("send timed out")]
    Timeout,
    #[error("client is closed")]
    Disconnected,
    #[error("event could not be encoded in the negotiated wire format")]
    Encode,
}

impl From<EnqueueError> for SendError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::Rejected => SendError::Full,
            EnqueueError::Timeout => SendError::Timeout,
            EnqueueError::Closed => SendError::Disconnected,
        }
    }
}

/// A reconnecting WebSocket client. Cloning shares the same underlying
/// connection and send queue -- it is not a "new client," just another
/// reference to the same one.
#[derive(Clone)]
pub struct ClientHandle {
    config: Arc<ClientConfig>,
    format: Arc<dyn WireFormat>,
    send_queue: SendQueue<Vec<u8>>,
    handlers: Arc<HandlerRegistry>,
    state: Arc<StateCell>,
    uid: Arc<SyncMutex<Option<String>>>,
    last_pong_millis: Arc<AtomicU64>,
    cmd_tx: mpsc::UnboundedSender<ActorCommand>,
}

impl ClientHandle {
    /// Connects to `config.url` and spawns the reactor task that owns
    /// the transport for the handle's whole lifetime.
    ///
    /// `on_channel_ready` fires on every successful entry into `Open`
    /// (fresh connection or reconnect); per spec.md §4.8 this is where
    /// applications re-register subscriptions, since handlers from a
    /// previous connection are not carried across automatically.
    /// `on_message` is installed as the wildcard catch-all handler for
    /// every non-reserved event (spec.md §4.8's "receive path").
    ///
    /// # Panics
    /// Panics if `config.format_id` names a format not present in
    /// `config.formats` -- a misconfiguration, not a runtime condition.
    pub fn connect(
        config: ClientConfig,
        on_channel_ready: impl Fn(&str) + Send + Sync + 'static,
        on_message: impl Fn(Event) + Send + Sync + 'static,
    ) -> Self {
        let format = config
            .formats
            .get(config.format_id)
            .unwrap_or_else(|| panic!("unknown wire format id: {}", config.format_id));
        let send_queue = SendQueue::new(config.send_queue_depth);
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(Predicate::Wildcard, on_message);
        let state = Arc::new(StateCell::new());
        let uid = Arc::new(SyncMutex::new(None));
        let last_pong_millis = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = ClientActor::new(
            config.clone(),
            Arc::clone(&format),
            send_queue.clone(),
            Arc::clone(&handlers),
            Arc::clone(&state),
            Arc::clone(&uid),
            Arc::clone(&last_pong_millis),
            Arc::new(on_channel_ready),
        );
        tokio::spawn(actor.run(cmd_rx));

        Self {
            config: Arc::new(config),
            format,
            send_queue,
            handlers,
            state,
            uid,
            last_pong_millis,
            cmd_tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state.get()
    }

    /// Ephemeral session id assigned at handshake; `None` before the
    /// first successful handshake.
    #[must_use]
    pub fn uid(&self) -> Option<String> {
        self.uid.lock().clone()
    }

    #[must_use]
    pub fn last_pong_millis(&self) -> u64 {
        self.last_pong_millis.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn encode(&self, event: &Event) -> Result<Vec<u8>, SendError> {
        self.format.encode(&event.to_value()).map_err(|e| {
            warn!(error = %e, "failed to encode outgoing event");
            SendError::Encode
        })
    }

    /// Non-blocking enqueue; returns `Err(Full)` immediately if the
    /// queue is at capacity.
    pub fn send(&self, event: Event) -> Result<(), SendError> {
        let bytes = self.encode(&event)?;
        self.send_queue.try_enqueue(bytes).map_err(|rejected| rejected.kind.into())
    }

    /// Enqueues, waiting up to `timeout` for space to open up.
    ///
    /// # Errors
    /// See [`SendError`].
    pub async fn send_timeout(&self, event: Event, timeout: Duration) -> Result<(), SendError> {
        let bytes = self.encode(&event)?;
        self.send_queue
            .enqueue_blocking(bytes, timeout)
            .await
            .map_err(|rejected| rejected.kind.into())
    }

    /// Sends `event` and waits for a reply correlated by a fresh
    /// reply-id, per spec.md §4.3's RPC convenience. Resolves to
    /// [`HandlerOutcome::Matched`] on a reply, `Timeout` if none
    /// arrives in time, or `Closed` if the client closes first.
    pub async fn request(&self, event: Event, timeout: Duration) -> Result<HandlerOutcome, SendError> {
        let reply_id = rpc::new_reply_id();
        // The reply-correlation-id is carried as a `reply-id` key inside
        // the payload map (see wsmux-server's `build_reply_fn`), not as
        // a separate wire-level tuple element -- `wrap_response`'s
        // embedding is identical for a request awaiting a reply, so it
        // is reused here rather than duplicated.
        let wrapped = rpc::wrap_response(event.id.clone(), &reply_id, event.payload);
        let bytes = self.encode(&wrapped)?;

        let (tx, rx) = tokio::sync::oneshot::channel();
        rpc::await_reply(&self.handlers, reply_id, timeout, move |outcome| {
            let _ = tx.send(outcome);
        });

        self.send_queue
            .try_enqueue(bytes)
            .map_err(|rejected| -> SendError { rejected.kind.into() })?;

        Ok(rx.await.unwrap_or(HandlerOutcome::Closed))
    }

    /// Subscribes to `channel` (spec.md §4.8's channel ops, sent as a
    /// plain client-initiated event; success/failure is reported back
    /// via the reserved `subscription-added`/`subscription-rejected`
    /// ids, observable through `on_message`).
    pub fn subscribe(&self, channel: impl Into<String>) -> Result<(), SendError> {
        let event = Event::new(
            EventId::from_static(EventId::SUBSCRIBE),
            Value::str(channel.into()),
        );
        self.send(event)
    }

    pub fn unsubscribe(&self, channel: impl Into<String>) -> Result<(), SendError> {
        let event = Event::new(
            EventId::from_static(EventId::UNSUBSCRIBE),
            Value::str(channel.into()),
        );
        self.send(event)
    }

    /// Publishes `data` to `channel`.
    pub fn publish(&self, channel: impl Into<String>, data: Value) -> Result<(), SendError> {
        let event = Event::new(
            EventId::from_static(EventId::PUBLISH),
            Value::Array(vec![Value::str(channel.into()), data]),
        );
        self.send(event)
    }

    /// Registers a persistent handler for a specific reserved or
    /// application event-id.
    pub fn on(&self, id: impl Into<EventId>, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.handlers.register(Predicate::Exact(id.into()), callback);
    }

    /// Closes the connection and stops reconnecting. Idempotent: a
    /// second call after the actor has already exited is a no-op.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(ActorCommand::Close);
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig::new("ws://127.0.0.1:1/ws")
    }

    #[test]
    fn enqueue_error_maps_to_send_error() {
        assert_eq!(SendError::from(EnqueueError::Rejected), SendError::Full);
        assert_eq!(SendError::from(EnqueueError::Timeout), SendError::Timeout);
        assert_eq!(SendError::from(EnqueueError::Closed), SendError::Disconnected);
    }

    #[tokio::test]
    async fn connect_starts_in_connecting_or_beyond() {
        let handle = ClientHandle::connect(test_config(), |_uid| {}, |_event| {});
        // The actor races ahead of this assertion; it should have left
        // `Disconnected` by the time `connect` returns control.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ne!(handle.state(), ClientState::Disconnected);
        handle.close();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let handle = ClientHandle::connect(test_config(), |_uid| {}, |_event| {});
        handle.close();
        handle.close();
    }
}
