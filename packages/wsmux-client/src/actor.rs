//! The reactor task that owns the transport across its whole lifetime,
//! including reconnects.
//!
//! Grounded on `other_examples/422ce7d9_tobert-hootenanny__crates-hooteproto-src-client.rs.rs`'s
//! `reactor_task` (a dedicated task owns the socket; callers only ever
//! talk to it through a command channel) and
//! `other_examples/13b04ad1_gakonst-ethers-rs__ethers-connections-src-connections-ws.rs.rs`'s
//! `WsServer::run` (a `tokio::select!` over the command channel and the
//! transport stream, biased toward commands). Unlike both references,
//! this actor's select loop runs once per *connection*; an outer loop
//! re-enters it after a reconnect, so the actor task itself survives
//! the whole client lifetime, not just one socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use wsmux_core::event::{Event, EventId};
use wsmux_core::value::Value;
use wsmux_core::{HandlerRegistry, SendQueue, WireFormat};

use crate::config::ClientConfig;
use crate::reconnect::Backoff;
use crate::state::{ClientState, StateCell};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Command sent from a [`crate::client::ClientHandle`] to its actor.
pub enum ActorCommand {
    /// Close the connection and stop reconnecting.
    Close,
}

/// Owns the transport, the handshake uid, and the reconnect backoff.
pub struct ClientActor {
    config: ClientConfig,
    format: Arc<dyn WireFormat>,
    send_queue: SendQueue<Vec<u8>>,
    handlers: Arc<HandlerRegistry>,
    state: Arc<StateCell>,
    uid: Arc<parking_lot::Mutex<Option<String>>>,
    on_channel_ready: Arc<dyn Fn(&str) + Send + Sync>,
    last_pong_millis: Arc<AtomicU64>,
}

impl ClientActor {
    /// `uid` and `last_pong_millis` are shared with the owning
    /// [`crate::client::ClientHandle`] so it can read them without a
    /// round trip through the command channel.
    pub fn new(
        config: ClientConfig,
        format: Arc<dyn WireFormat>,
        send_queue: SendQueue<Vec<u8>>,
        handlers: Arc<HandlerRegistry>,
        state: Arc<StateCell>,
        uid: Arc<parking_lot::Mutex<Option<String>>>,
        last_pong_millis: Arc<AtomicU64>,
        on_channel_ready: Arc<dyn Fn(&str) + Send + Sync>,
    ) -> Self {
        Self {
            config,
            format,
            send_queue,
            handlers,
            state,
            uid,
            on_channel_ready,
            last_pong_millis,
        }
    }

    /// Drives the client through its whole lifetime: connect, serve one
    /// connection, and either reconnect (with backoff) or terminate,
    /// until an explicit close or a non-retrying transport loss.
    pub async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<ActorCommand>) {
        let mut backoff = Backoff::new(
            self.config.reconnect_initial_delay,
            self.config.reconnect_max_delay,
        );

        loop {
            self.state.transition(ClientState::Connecting);
            let stream = match tokio_tungstenite::connect_async(&self.config.url).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(error = %e, url = %self.config.url, "connect failed");
                    if !self.config.auto_reconnect {
                        self.state.transition(ClientState::Closed);
                        self.handlers.close_all();
                        return;
                    }
                    self.state.transition(ClientState::Reconnecting);
                    if !self.wait_backoff_or_close(&mut backoff, &mut cmd_rx).await {
                        self.finish_closed();
                        return;
                    }
                    continue;
                }
            };

            self.state.transition(ClientState::Handshaking);
            let closed = self.serve_connection(stream, &mut cmd_rx, &mut backoff).await;
            if closed {
                self.finish_closed();
                return;
            }
            if !self.config.auto_reconnect {
                self.finish_closed();
                return;
            }
            self.state.transition(ClientState::Reconnecting);
            if !self.wait_backoff_or_close(&mut backoff, &mut cmd_rx).await {
                self.finish_closed();
                return;
            }
        }
    }

    fn finish_closed(&self) {
        self.state.transition(ClientState::Closed);
        let _ = self.send_queue.stop();
        self.handlers.close_all();
        info!("client actor exiting");
    }

    /// Waits out the current backoff delay, or returns `false` early if
    /// a `Close` command (or a dropped command channel) arrives first.
    async fn wait_backoff_or_close(
        &self,
        backoff: &mut Backoff,
        cmd_rx: &mut mpsc::UnboundedReceiver<ActorCommand>,
    ) -> bool {
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis(), "reconnecting after backoff");
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            cmd = cmd_rx.recv() => !matches!(cmd, Some(ActorCommand::Close) | None),
        }
    }

    /// Runs one connection's select loop until the transport closes or
    /// an explicit close command arrives. Returns `true` if the client
    /// should terminate entirely (explicit close), `false` if it should
    /// attempt a reconnect.
    async fn serve_connection(
        &self,
        stream: WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<ActorCommand>,
        backoff: &mut Backoff,
    ) -> bool {
        let (sink, mut stream) = stream.split();
        let sink = Arc::new(AsyncMutex::new(sink));

        let write_sink = Arc::clone(&sink);
        let writer: Arc<dyn Fn(Vec<u8>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>> + Send + Sync> =
            Arc::new(move |bytes: Vec<u8>| {
                let sink = Arc::clone(&write_sink);
                Box::pin(async move {
                    sink.lock()
                        .await
                        .send(Message::Binary(bytes.into()))
                        .await
                        .map_err(|e| e.to_string())
                })
            });
        let on_error: Arc<dyn Fn(String) + Send + Sync> =
            Arc::new(|reason| warn!(reason, "client write failed"));

        let flush_handle = self
            .send_queue
            .start(self.config.flush_interval, writer, on_error);

        let result = loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(ActorCommand::Close) | None => break true,
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Binary(bytes))) => self.handle_frame(&bytes, backoff),
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_bytes(), backoff),
                    Some(Ok(Message::Close(_))) | None => break false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "transport read error");
                        break false;
                    }
                },
            }
        };

        flush_handle.abort();
        if result {
            let mut sink = sink.lock().await;
            let _ = sink.send(Message::Close(None)).await;
        }
        result
    }

    fn handle_frame(&self, bytes: &[u8], backoff: &mut Backoff) {
        let value = match self.format.decode(bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "discarding undecodable frame");
                return;
            }
        };
        let event = match Event::from_value(value) {
            Ok(event) => event,
            Err(reason) => {
                warn!(reason, "discarding malformed event frame");
                return;
            }
        };

        if event.id.as_str() == EventId::HANDSHAKE {
            self.handle_handshake(&event, backoff);
            return;
        }
        if event.id.as_str() == EventId::PING {
            self.handle_ping(&event);
            return;
        }
        if event.id.as_str() == EventId::PONG {
            self.last_pong_millis.store(now_millis(), Ordering::Relaxed);
            return;
        }
        self.handlers.dispatch(&event);
    }

    fn handle_handshake(&self, event: &Event, backoff: &mut Backoff) {
        let uid = match &event.payload {
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        };
        if let Some(uid) = uid {
            *self.uid.lock() = Some(uid.clone());
            self.state.transition(ClientState::Open);
            backoff.reset();
            (self.on_channel_ready)(&uid);
        } else {
            warn!("handshake payload missing uid");
        }
    }

    fn handle_ping(&self, event: &Event) {
        let pong = Event::new(EventId::from_static(EventId::PONG), event.payload.clone());
        match self.format.encode(&pong.to_value()) {
            Ok(bytes) => {
                if self.send_queue.try_enqueue(bytes).is_err() {
                    warn!("failed to enqueue pong: queue full or closed");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode pong"),
        }
    }

    #[must_use]
    pub fn uid(&self) -> Option<String> {
        self.uid.lock().clone()
    }

    /// Milliseconds-since-epoch timestamp of the last `pong` received.
    #[must_use]
    pub fn last_pong_millis(&self) -> u64 {
        self.last_pong_millis.load(Ordering::Relaxed)
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
