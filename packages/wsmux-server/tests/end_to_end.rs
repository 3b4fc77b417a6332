//! End-to-end scenarios driven over a real `TcpListener`-bound server,
//! using `tokio-tungstenite` as the wire client -- the same round-trip
//! path spec.md §8 describes, exercised through the actual transport
//! rather than in-process dispatch (see `src/network/handlers/websocket.rs`
//! and `src/channel.rs` for the unit-level coverage of the same logic).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use wsmux_core::event::{Event, EventId};
use wsmux_core::value::Value;
use wsmux_core::{rpc, FormatRegistry};
use wsmux_server::app::{EventHandler, ReplyFn};
use wsmux_server::{ConnectionId, NetworkModule, ServerConfig};

async fn start_server(config: ServerConfig, on_event: EventHandler) -> (u16, oneshot::Sender<()>) {
    let mut module = NetworkModule::new(config, on_event);
    let port = module.start().await.expect("server should bind");
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        module
            .serve(async {
                let _ = rx.await;
            })
            .await
            .expect("server should shut down cleanly");
    });
    (port, tx)
}

fn noop_handler() -> EventHandler {
    Arc::new(|_conn, _event, _reply| {})
}

/// Like `start_server`, but also hands back the connection table so a
/// test can observe a heartbeat reap (which only removes a connection
/// from the table, not from the transport -- see `src/heartbeat.rs`).
async fn start_server_with_connections(
    config: ServerConfig,
    on_event: EventHandler,
) -> (u16, oneshot::Sender<()>, Arc<wsmux_server::ConnectionTable>) {
    let mut module = NetworkModule::new(config, on_event);
    let port = module.start().await.expect("server should bind");
    let connections = module.connections();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        module
            .serve(async {
                let _ = rx.await;
            })
            .await
            .expect("server should shut down cleanly");
    });
    (port, tx, connections)
}

async fn connect(port: u16) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let url = format!("ws://127.0.0.1:{port}/ws");
    let (stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("client should connect");
    stream
}

async fn recv_event(
    stream: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    formats: &FormatRegistry,
) -> Event {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("should receive a frame before the deadline")
        .expect("stream should not end")
        .expect("frame should not be a transport error");
    let bytes = match msg {
        Message::Binary(b) => b.to_vec(),
        Message::Text(t) => t.as_bytes().to_vec(),
        other => panic!("unexpected message type: {other:?}"),
    };
    let format = formats.get("json").unwrap();
    let value = format.decode(&bytes).unwrap();
    Event::from_value(value).unwrap()
}

async fn send_event(
    stream: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    formats: &FormatRegistry,
    event: &Event,
) {
    let format = formats.get("json").unwrap();
    let bytes = format.encode(&event.to_value()).unwrap();
    stream.send(Message::Binary(bytes.into())).await.unwrap();
}

#[tokio::test]
async fn handshake_then_ping_pong_round_trip() {
    let formats = FormatRegistry::with_defaults();
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let (port, shutdown) = start_server(config, noop_handler()).await;

    let mut client = connect(port).await;
    let handshake = recv_event(&mut client, &formats).await;
    assert_eq!(handshake.id.as_str(), EventId::HANDSHAKE);
    let Value::Array(items) = &handshake.payload else {
        panic!("handshake payload must be an array");
    };
    assert!(items[0].as_str().is_some(), "first element is the assigned uid");

    let ping = Event::new(EventId::from_static(EventId::PING), Value::Int(42));
    send_event(&mut client, &formats, &ping).await;
    let pong = recv_event(&mut client, &formats).await;
    assert_eq!(pong.id.as_str(), EventId::PONG);
    assert_eq!(pong.payload, Value::Int(42));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn subscribe_publish_fans_out_in_order() {
    let formats = FormatRegistry::with_defaults();
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let (port, shutdown) = start_server(config, noop_handler()).await;

    let mut publisher = connect(port).await;
    recv_event(&mut publisher, &formats).await; // handshake

    let mut subscriber = connect(port).await;
    recv_event(&mut subscriber, &formats).await; // handshake

    send_event(
        &mut subscriber,
        &formats,
        &Event::new(EventId::from_static(EventId::SUBSCRIBE), Value::str("room")),
    )
    .await;
    let ack = recv_event(&mut subscriber, &formats).await;
    assert_eq!(ack.id.as_str(), EventId::SUBSCRIPTION_ADDED);

    for n in 0..3i64 {
        send_event(
            &mut publisher,
            &formats,
            &Event::new(
                EventId::from_static(EventId::PUBLISH),
                Value::Array(vec![Value::str("room"), Value::Int(n)]),
            ),
        )
        .await;
    }

    for n in 0..3i64 {
        let msg = tokio::time::timeout(Duration::from_secs(2), subscriber.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let bytes = match msg {
            Message::Binary(b) => b.to_vec(),
            other => panic!("unexpected message: {other:?}"),
        };
        let value = formats.get("json").unwrap().decode(&bytes).unwrap();
        assert_eq!(value, Value::Int(n), "publishes must arrive in send order");
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn rpc_request_receives_reply_through_reply_fn() {
    let formats = FormatRegistry::with_defaults();
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let on_event: EventHandler = Arc::new(|_conn: ConnectionId, event: Event, reply: Option<ReplyFn>| {
        if let Some(reply) = reply {
            assert_eq!(event.id.as_str(), "app/echo");
            reply.send(event.payload);
        }
    });
    let (port, shutdown) = start_server(config, on_event).await;

    let mut client = connect(port).await;
    recv_event(&mut client, &formats).await; // handshake

    let reply_id = rpc::new_reply_id();
    let request = rpc::wrap_response(EventId::new("app/echo"), &reply_id, Value::str("hello"));
    send_event(&mut client, &formats, &request).await;

    let response = recv_event(&mut client, &formats).await;
    assert_eq!(
        response.payload.get("reply-id").and_then(Value::as_str),
        Some(reply_id.as_str())
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn connection_limit_rejects_upgrade_past_capacity() {
    let config = ServerConfig {
        port: 0,
        max_connections: 1,
        ..ServerConfig::default()
    };
    let (port, shutdown) = start_server(config, noop_handler()).await;

    let _first = connect(port).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let url = format!("ws://127.0.0.1:{port}/ws");
    let err = tokio_tungstenite::connect_async(&url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 503);
        }
        other => panic!("expected an HTTP 503 rejection, got {other:?}"),
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn backpressure_counts_rejected_deliveries_without_blocking_publisher() {
    let formats = FormatRegistry::with_defaults();
    let delivered = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig {
        port: 0,
        connection: wsmux_server::config::ConnectionConfig {
            send_queue_depth: 2,
            ..wsmux_server::config::ConnectionConfig::default()
        },
        ..ServerConfig::default()
    };
    let (port, shutdown) = start_server(config, noop_handler()).await;

    let mut publisher = connect(port).await;
    recv_event(&mut publisher, &formats).await;
    let mut subscriber = connect(port).await;
    recv_event(&mut subscriber, &formats).await;

    send_event(
        &mut subscriber,
        &formats,
        &Event::new(EventId::from_static(EventId::SUBSCRIBE), Value::str("flood")),
    )
    .await;
    recv_event(&mut subscriber, &formats).await; // subscription-added

    for n in 0..10i64 {
        send_event(
            &mut publisher,
            &formats,
            &Event::new(
                EventId::from_static(EventId::PUBLISH),
                Value::Array(vec![Value::str("flood"), Value::Int(n)]),
            ),
        )
        .await;
    }

    // The publisher's own send must not have blocked despite the flood;
    // reaching this point at all demonstrates that.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while tokio::time::timeout(Duration::from_millis(50), subscriber.next())
        .await
        .ok()
        .flatten()
        .is_some()
    {
        delivered.fetch_add(1, Ordering::SeqCst);
    }
    assert!(
        delivered.load(Ordering::SeqCst) <= 10,
        "subscriber must never see more frames than were published"
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn heartbeat_pings_then_reaps_a_connection_that_never_pongs() {
    let formats = FormatRegistry::with_defaults();
    let config = ServerConfig {
        port: 0,
        heartbeat: wsmux_server::config::HeartbeatConfig::new(
            Duration::from_millis(20),
            Duration::from_millis(40),
        )
        .unwrap(),
        ..ServerConfig::default()
    };
    let (port, shutdown, connections) = start_server_with_connections(config, noop_handler()).await;

    let mut client = connect(port).await;
    recv_event(&mut client, &formats).await; // handshake
    assert_eq!(connections.count(), 1);

    let ping = recv_event(&mut client, &formats).await;
    assert_eq!(ping.id.as_str(), EventId::PING, "server should proactively ping an idle connection");

    // Never send a pong back; once the timeout elapses the sweep must
    // reap the connection from the table.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(connections.count(), 0, "dead connection should be reaped");

    let _ = shutdown.send(());
}
