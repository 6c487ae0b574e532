//! End-to-end exercise against an in-process gateway.
//!
//! A minimal WebSocket server plays the gateway side of the protocol:
//! challenge, handshake, session list push. The client under test runs its
//! real supervisor loop against it.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use porthole_core::{ConnectionState, GatewayClient, GatewayConfig, GatewayEvent};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) -> Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> Result<Value> {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .context("timed out waiting for client frame")?
            .context("client hung up")??;
        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(_) => bail!("client closed early"),
            _ => continue,
        }
    }
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<GatewayEvent>) -> GatewayEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Gateway side of one connection: challenge the client, accept its connect
/// request, push a session list, then echo back the first chat request seen.
async fn run_gateway(listener: TcpListener) -> Result<Value> {
    let (stream, _) = timeout(WAIT, listener.accept()).await??;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    send_json(
        &mut ws,
        json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "n-1"}}),
    )
    .await?;

    let connect = recv_json(&mut ws).await?;
    assert_eq!(connect["type"], "req");
    assert_eq!(connect["method"], "connect");
    assert_eq!(connect["params"]["auth"]["token"], "test-token");
    assert_eq!(connect["params"]["client"]["id"], "porthole");

    send_json(&mut ws, json!({"type": "res", "payload": {"type": "hello-ok"}})).await?;

    send_json(
        &mut ws,
        json!({"type": "res", "payload": {"sessions": [
            {"key": "agent:main:main", "status": "active"},
            {"key": "agent:sub:1", "status": "idle"}
        ]}}),
    )
    .await?;

    // Next request from the client should be the chat send.
    let chat = recv_json(&mut ws).await?;
    let _ = ws.close(None).await;
    Ok(chat)
}

#[tokio::test]
async fn full_connection_lifecycle() -> Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let gateway = tokio::spawn(run_gateway(listener));

    let mut config = GatewayConfig::new(format!("ws://{addr}"), "test-token");
    // Keep the background refresh quiet so the gateway script stays simple.
    config.settle_delay = Duration::from_secs(120);
    config.health_interval = Duration::from_secs(120);

    let client = GatewayClient::new(config);
    let mut events = client.subscribe();
    client.connect().await;

    match next_event(&mut events).await {
        GatewayEvent::ConnectionStateChanged(s) => assert_eq!(s, ConnectionState::Connecting),
        other => panic!("expected connecting, got {other:?}"),
    }
    match next_event(&mut events).await {
        GatewayEvent::ConnectionStateChanged(s) => assert_eq!(s, ConnectionState::Connected),
        other => panic!("expected connected, got {other:?}"),
    }

    match next_event(&mut events).await {
        GatewayEvent::SessionsChanged(sessions) => {
            assert_eq!(sessions.len(), 2);
            assert_eq!(sessions[0].key, "agent:main:main");
            assert!(sessions[0].is_main);
        }
        other => panic!("expected sessions, got {other:?}"),
    }
    assert_eq!(client.sessions().await.len(), 2);
    assert_eq!(client.connection_state().await, ConnectionState::Connected);

    client.send_chat_message("hello from the tray").await?;

    let chat = timeout(WAIT, gateway).await??.context("gateway script failed")?;
    assert_eq!(chat["type"], "req");
    assert_eq!(chat["method"], "chat.send");
    assert_eq!(chat["params"]["message"], "hello from the tray");

    client.disconnect().await;
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn disconnect_during_stalled_connect_stays_clean() -> Result<()> {
    init_tracing();
    // Accepts the TCP connection but never answers the WebSocket upgrade,
    // so the client stays stuck in Connecting.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hold = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            open.push(stream);
        }
    });

    let client = GatewayClient::new(GatewayConfig::new(format!("ws://{addr}"), "t"));
    let mut events = client.subscribe();
    client.connect().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // No handshake yet, so commands fail instead of queueing.
    assert!(matches!(
        client.send_chat_message("x").await,
        Err(porthole_core::GatewayError::NotConnected)
    ));

    client.disconnect().await;

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let GatewayEvent::ConnectionStateChanged(state) = event {
            states.push(state);
        }
    }
    // A requested shutdown never detours through Error.
    assert_eq!(
        states,
        [ConnectionState::Connecting, ConnectionState::Disconnected]
    );
    hold.abort();
    Ok(())
}

#[tokio::test]
async fn commands_require_a_connection() {
    let client = GatewayClient::new(GatewayConfig::new("ws://127.0.0.1:9", "t"));
    assert!(client.send_chat_message("x").await.is_err());
    assert!(client.start_channel("telegram").await.is_err());
}
