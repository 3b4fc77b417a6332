//! WebSocket upgrade handler: the full accept/read/write/close path.
//!
//! Grounded on the actor-ownership shape of the retrieval pack's
//! `WsServer::run` select loop (`other_examples/.../ethers-rs-ws.rs.rs`):
//! one task owns the socket's read half and drives inbound dispatch,
//! while `wsmux_core::SendQueue::start` owns the write half via its own
//! flush loop, so the two directions never contend over the socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use wsmux_core::event::{Event, EventId};
use wsmux_core::value::Value;
use wsmux_core::WireFormat;

use crate::app::{AppState, ReplyFn};
use crate::connection::{ConnectionEntry, ConnectionId};

/// Upgrades an HTTP connection to a WebSocket connection.
///
/// Rejects the upgrade with 503 once `max_connections` is reached
/// (spec.md §4.7's configurable connection cap).
pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if state.connections.count() >= state.config.max_connections {
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let format_id = state.config.default_format;
    let Some(format) = state.config.formats.get(format_id) else {
        warn!(format_id, "default wire format not registered, refusing connection");
        return;
    };

    let entry = state
        .connections
        .register(&state.config.connection, format_id);
    let conn_id = entry.id;
    info!(conn_id = conn_id.0, format_id, "connection accepted");

    let (sink, mut stream) = socket.split();
    let sink = Arc::new(AsyncMutex::new(sink));

    let flush_sink = Arc::clone(&sink);
    let writer_conn_id = conn_id.0;
    let writer = Arc::new(move |frame: Vec<u8>| -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> {
        let sink = Arc::clone(&flush_sink);
        Box::pin(async move {
            sink.lock()
                .await
                .send(Message::Binary(frame.into()))
                .await
                .map_err(|e| e.to_string())
        })
    });
    let on_error = Arc::new(move |reason: String| {
        warn!(conn_id = writer_conn_id, error = %reason, "write error on connection");
    });
    let flush_handle = entry
        .send_queue
        .start(state.config.connection.flush_interval, writer, on_error);

    send_handshake(&entry, format.as_ref(), conn_id);

    while let Some(frame) = stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(err) => {
                debug!(conn_id = conn_id.0, error = %err, "transport read error, closing");
                break;
            }
        };

        let bytes = match msg {
            Message::Binary(bytes) => Some(bytes.to_vec()),
            Message::Text(text) => Some(text.as_bytes().to_vec()),
            Message::Pong(_) => {
                entry.record_pong();
                None
            }
            Message::Ping(_) | Message::Close(_) => None,
        };

        if let Some(bytes) = bytes {
            if bytes.len() > state.config.connection.max_message_bytes {
                warn!(conn_id = conn_id.0, len = bytes.len(), "frame too large, closing");
                break;
            }
            entry.record_message_received();
            dispatch_frame(&state, &entry, format.as_ref(), conn_id, &bytes);
        }
    }

    flush_handle.abort();
    state.channels.unsubscribe_all(&state.connections, conn_id);
    state.connections.remove(conn_id);
    let unsent = entry.send_queue.stop();
    info!(conn_id = conn_id.0, unsent = unsent.len(), "connection closed");
}

fn send_handshake(entry: &ConnectionEntry, format: &dyn WireFormat, conn_id: ConnectionId) {
    let handshake = Event::new(
        EventId::from_static(EventId::HANDSHAKE),
        Value::Array(vec![
            Value::str(conn_id.0.to_string()),
            Value::Nil, // csrf-token: unused, preserved for wire compatibility
            Value::Map(vec![]),
            Value::Bool(true), // first?
        ]),
    );
    match format.encode(&handshake.to_value()) {
        Ok(frame) => {
            let _ = entry.try_send(frame);
        }
        Err(err) => warn!(conn_id = conn_id.0, error = %err, "failed to encode handshake"),
    }
}

fn dispatch_frame(
    state: &AppState,
    entry: &ConnectionEntry,
    format: &dyn WireFormat,
    conn_id: ConnectionId,
    bytes: &[u8],
) {
    let value = match format.decode(bytes) {
        Ok(value) => value,
        Err(err) => {
            warn!(conn_id = conn_id.0, error = %err, "decode error, dropping message");
            return;
        }
    };
    let event = match Event::from_value(value) {
        Ok(event) => event,
        Err(reason) => {
            warn!(conn_id = conn_id.0, reason, "protocol error, malformed event frame");
            return;
        }
    };

    if event.id.is_reserved() {
        route_system_event(state, entry, format, conn_id, event);
        return;
    }

    let reply_fn = reply_id_of(&event).map(|reply_id| build_reply_fn(state, conn_id, event.id.clone(), reply_id));
    (state.on_event)(conn_id, event, reply_fn);
}

fn reply_id_of(event: &Event) -> Option<String> {
    event
        .payload
        .get("reply-id")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn build_reply_fn(state: &AppState, conn_id: ConnectionId, event_id: EventId, reply_id: String) -> ReplyFn {
    let connections = Arc::clone(&state.connections);
    let formats = state.config.formats.clone();
    let format_id = state.config.default_format;
    ReplyFn::new(move |payload: Value| {
        let Some(entry) = connections.get(conn_id) else {
            return;
        };
        let Some(format) = formats.get(format_id) else {
            return;
        };
        let response = wsmux_core::rpc::wrap_response(event_id.clone(), &reply_id, payload);
        if let Ok(frame) = format.encode(&response.to_value()) {
            let _ = entry.try_send(frame);
        }
    })
}

fn route_system_event(
    state: &AppState,
    entry: &ConnectionEntry,
    format: &dyn WireFormat,
    conn_id: ConnectionId,
    event: Event,
) {
    match event.id.as_str() {
        EventId::PONG => entry.record_pong(),
        EventId::PING => {
            let pong = Event::new(EventId::from_static(EventId::PONG), event.payload);
            if let Ok(frame) = format.encode(&pong.to_value()) {
                let _ = entry.try_send(frame);
            }
        }
        EventId::SUBSCRIBE => {
            if let Some(name) = event.payload.as_str() {
                handle_subscribe(state, format, conn_id, name);
            }
        }
        EventId::UNSUBSCRIBE => {
            if let Some(name) = event.payload.as_str() {
                state.channels.unsubscribe(&state.connections, conn_id, name);
            }
        }
        EventId::PUBLISH => {
            if let Value::Array(items) = &event.payload {
                if let [name_value, payload] = &items[..] {
                    if let Some(name) = name_value.as_str() {
                        if let Ok(frame) = format.encode(payload) {
                            state.channels.publish(&state.connections, name, &frame);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn handle_subscribe(state: &AppState, format: &dyn WireFormat, conn_id: ConnectionId, name: &str) {
    let outcome = state.channels.subscribe(&state.connections, conn_id, name);
    let Some(entry) = state.connections.get(conn_id) else {
        return;
    };
    let (event_id, payload) = match outcome {
        Ok(()) => (
            EventId::from_static(EventId::SUBSCRIPTION_ADDED),
            Value::str(name),
        ),
        Err(reason) => (
            EventId::from_static(EventId::SUBSCRIPTION_REJECTED),
            Value::Map(vec![
                (Value::str("channel"), Value::str(name)),
                (Value::str("reason"), Value::str(reason.to_string())),
            ]),
        ),
    };
    let notification = Event::new(event_id, payload);
    if let Ok(frame) = format.encode(&notification.to_value()) {
        let _ = entry.try_send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_app_state;

    #[test]
    fn dispatch_frame_routes_ping_to_pong() {
        let state = test_app_state();
        let format = state.config.formats.get("json").unwrap();
        let entry = state
            .connections
            .register(&state.config.connection, "json");

        let ping = Event::new(EventId::from_static(EventId::PING), Value::Int(1));
        let frame = format.encode(&ping.to_value()).unwrap();
        dispatch_frame(&state, &entry, format.as_ref(), entry.id, &frame);

        assert_eq!(entry.send_queue.stats().depth, 1);
    }

    #[test]
    fn dispatch_frame_routes_subscribe_to_channel_manager() {
        let state = test_app_state();
        let format = state.config.formats.get("json").unwrap();
        let entry = state
            .connections
            .register(&state.config.connection, "json");

        let subscribe = Event::new(EventId::from_static(EventId::SUBSCRIBE), Value::str("room"));
        let frame = format.encode(&subscribe.to_value()).unwrap();
        dispatch_frame(&state, &entry, format.as_ref(), entry.id, &frame);

        assert_eq!(state.channels.subscriber_count("room"), 1);
    }

    #[test]
    fn dispatch_frame_invokes_user_handler_for_app_events() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);
        let mut state = test_app_state();
        state.on_event = Arc::new(move |_conn, event, _reply| {
            assert_eq!(event.id.as_str(), "app/greet");
            called_clone.store(true, Ordering::SeqCst);
        });

        let format = state.config.formats.get("json").unwrap();
        let entry = state
            .connections
            .register(&state.config.connection, "json");
        let greet = Event::new(EventId::new("app/greet"), Value::str("hi"));
        let frame = format.encode(&greet.to_value()).unwrap();
        dispatch_frame(&state, &entry, format.as_ref(), entry.id, &frame);

        assert!(called.load(Ordering::SeqCst));
    }
}
