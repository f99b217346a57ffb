//! Gateway integration tests.
//!
//! Drives the session controller against a mock gateway built on a plain
//! WebSocket listener.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gatelink::gateway::{ConnectionState, GatewayClient, GatewayEvent, Termination};
use gatelink::{ClientConfig, ClientError, DispatchEvent, ReconnectConfig};
use gatelink_proto::{decode, GatewayEndpoint, Intents, OpCode, Payload, SessionStartLimit};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const STEP: Duration = Duration::from_secs(3);

// ============================================================================
// Test Helpers - Mock Gateway Server
// ============================================================================

/// A mock gateway server for testing.
struct MockGateway {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockGateway {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        Self { listener, addr }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Accept the next connection and complete the WebSocket upgrade.
    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(STEP, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("accept");
        accept_async(stream).await.expect("websocket upgrade")
    }

    /// Assert nobody connects within `wait`.
    async fn expect_no_connection(&self, wait: Duration) {
        let result = timeout(wait, self.listener.accept()).await;
        assert!(result.is_err(), "unexpected reconnection");
    }

    /// Accept, send HELLO and return the handshake frame the client sent.
    async fn accept_with_hello(&self, interval_ms: u64) -> (WebSocketStream<TcpStream>, Payload) {
        let mut ws = self.accept().await;
        send_json(&mut ws, json!({"op": 10, "d": {"heartbeat_interval": interval_ms}})).await;
        let handshake = next_payload(&mut ws).await;
        (ws, handshake)
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send to client");
}

async fn send_ready(ws: &mut WebSocketStream<TcpStream>, seq: u64, data: Value) {
    send_json(ws, json!({"op": 0, "s": seq, "t": "READY", "d": data})).await;
}

async fn close_with(ws: &mut WebSocketStream<TcpStream>, code: u16) {
    ws.close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
    .await
    .expect("close");
}

/// Next text frame from the client, decoded.
async fn next_payload(ws: &mut WebSocketStream<TcpStream>) -> Payload {
    loop {
        let msg = timeout(STEP, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return decode(text.as_bytes()).expect("client sent invalid payload"),
            Message::Close(frame) => panic!("client closed: {frame:?}"),
            _ => {}
        }
    }
}

/// Next close code from the client, skipping any other frames.
async fn next_close_code(ws: &mut WebSocketStream<TcpStream>) -> (Vec<Payload>, Option<u16>) {
    let mut before = Vec::new();
    loop {
        let msg = timeout(STEP, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => before.push(decode(text.as_bytes()).expect("payload")),
            Message::Close(frame) => return (before, frame.map(|f| u16::from(f.code))),
            _ => {}
        }
    }
}

async fn next_dispatch(events: &mut mpsc::Receiver<GatewayEvent>) -> DispatchEvent {
    loop {
        let event = timeout(STEP, events.recv())
            .await
            .expect("timed out waiting for dispatch")
            .expect("event channel closed");
        if let GatewayEvent::Dispatch(dispatch) = event {
            return dispatch;
        }
    }
}

// ============================================================================
// Test Helpers - Configuration
// ============================================================================

fn test_config() -> ClientConfig {
    ClientConfig::new("test-token", Intents::GUILDS)
        .with_heartbeat_jitter(false)
        .with_invalid_session_delay(Duration::from_millis(10))
        .with_reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
            max_attempts: None,
        })
}

fn client_for(gateway: &MockGateway, config: ClientConfig) -> GatewayClient {
    GatewayClient::new(GatewayEndpoint::direct(gateway.url()), config).expect("client")
}

fn exhausted_endpoint(gateway: &MockGateway, reset_after: u64) -> GatewayEndpoint {
    GatewayEndpoint {
        session_start_limit: SessionStartLimit {
            total: 1000,
            remaining: 0,
            reset_after,
            max_concurrency: 1,
        },
        ..GatewayEndpoint::direct(gateway.url())
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_hello_identify_ready_retains_session() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, identify) = gateway.accept_with_hello(45_000).await;
    assert_eq!(identify.op, OpCode::Identify);
    assert_eq!(identify.d["token"], "test-token");
    assert_eq!(identify.d["intents"], 1);
    assert_eq!(identify.d["properties"]["browser"], "gatelink");
    assert!(identify.s.is_none());
    assert!(identify.t.is_none());

    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;

    let ready = next_dispatch(&mut events).await;
    assert_eq!(ready.name, "READY");
    assert_eq!(ready.sequence, Some(1));

    let session = client.session();
    assert_eq!(session.session_id(), Some("abc"));
    assert_eq!(session.sequence(), Some(1));
    assert_eq!(session.heartbeat_interval(), Some(Duration::from_millis(45_000)));
    assert_eq!(client.state(), ConnectionState::Active);

    client.stop().await;
    let (_, code) = next_close_code(&mut ws).await;
    assert_eq!(code, Some(1000));
    assert_eq!(client.state(), ConnectionState::Stopped);
    assert_eq!(client.run().await, Termination::Graceful);
}

#[tokio::test]
async fn test_connected_event_precedes_dispatches() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;

    let first = timeout(STEP, events.recv()).await.expect("timeout").expect("event");
    assert_eq!(first, GatewayEvent::Connected);
    let second = timeout(STEP, events.recv()).await.expect("timeout").expect("event");
    assert!(matches!(second, GatewayEvent::Dispatch(_)));

    client.stop().await;
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    ws.send(Message::Text("not json".to_string().into())).await.expect("send");
    send_json(&mut ws, json!({"d": null})).await;
    send_json(&mut ws, json!({"op": 42, "d": null})).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;

    let ready = next_dispatch(&mut events).await;
    assert_eq!(ready.name, "READY");
    assert_eq!(client.state(), ConnectionState::Active);

    client.stop().await;
}

#[tokio::test]
async fn test_zero_heartbeat_interval_is_fatal() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let _events = client.start().await.expect("start");

    let mut ws = gateway.accept().await;
    send_json(&mut ws, json!({"op": 10, "d": {"heartbeat_interval": 0}})).await;

    let termination = timeout(STEP, client.run()).await.expect("run");
    assert!(
        matches!(&termination, Termination::Fatal(reason) if reason.starts_with("handshake failed")),
        "unexpected termination: {termination}"
    );
    assert_eq!(termination.exit_code(), 50);
    assert!(client.last_failure().is_some());
    gateway.expect_no_connection(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_non_hello_first_frame_is_fatal() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let _events = client.start().await.expect("start");

    let mut ws = gateway.accept().await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;

    let termination = timeout(STEP, client.run()).await.expect("run");
    assert!(matches!(termination, Termination::Fatal(_)));
}

// ============================================================================
// Reconnect and resume
// ============================================================================

#[tokio::test]
async fn test_abnormal_close_resumes_session() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, identify) = gateway.accept_with_hello(45_000).await;
    assert_eq!(identify.op, OpCode::Identify);
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    close_with(&mut ws, 4000).await;

    let (_ws, resume) = gateway.accept_with_hello(45_000).await;
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["session_id"], "abc");
    assert_eq!(resume.d["seq"], 1);
    assert_eq!(resume.d["token"], "test-token");
    assert!(client.last_failure().is_some());

    client.stop().await;
}

#[tokio::test]
async fn test_resume_uses_resume_gateway_url() {
    let gateway = MockGateway::new().await;
    let resume_gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(
        &mut ws,
        1,
        json!({"session_id": "abc", "resume_gateway_url": resume_gateway.url()}),
    )
    .await;
    next_dispatch(&mut events).await;
    drop(ws);

    let (_ws, resume) = resume_gateway.accept_with_hello(45_000).await;
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["session_id"], "abc");

    client.stop().await;
}

#[tokio::test]
async fn test_sequence_tracks_highest_dispatch() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    send_json(&mut ws, json!({"op": 0, "s": 5, "t": "MESSAGE_CREATE", "d": {"content": "hi"}})).await;
    send_json(&mut ws, json!({"op": 0, "s": 3, "t": "MESSAGE_CREATE", "d": {}})).await;

    next_dispatch(&mut events).await;
    let message = next_dispatch(&mut events).await;
    assert_eq!(message.name, "MESSAGE_CREATE");
    assert_eq!(message.data["content"], "hi");
    next_dispatch(&mut events).await;
    assert_eq!(client.session().sequence(), Some(5));

    close_with(&mut ws, 4000).await;
    let (_ws, resume) = gateway.accept_with_hello(45_000).await;
    assert_eq!(resume.d["seq"], 5);

    client.stop().await;
}

#[tokio::test]
async fn test_server_reconnect_request_resumes() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    send_json(&mut ws, json!({"op": 7, "d": null})).await;

    let (_, code) = next_close_code(&mut ws).await;
    assert_eq!(code, Some(4000));

    let (_ws, resume) = gateway.accept_with_hello(45_000).await;
    assert_eq!(resume.op, OpCode::Resume);

    client.stop().await;
}

#[tokio::test]
async fn test_non_resumable_invalid_session_identifies_fresh() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    send_json(&mut ws, json!({"op": 9, "d": false})).await;

    let (_ws, identify) = gateway.accept_with_hello(45_000).await;
    assert_eq!(identify.op, OpCode::Identify);
    assert!(client.session().session_id().is_none());
    assert!(client.session().sequence().is_none());

    client.stop().await;
}

#[tokio::test]
async fn test_resumable_invalid_session_resumes() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    send_json(&mut ws, json!({"op": 9, "d": true})).await;

    let (_ws, resume) = gateway.accept_with_hello(45_000).await;
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["session_id"], "abc");

    client.stop().await;
}

#[tokio::test]
async fn test_reconnect_attempts_exhausted() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let config = test_config().with_reconnect(ReconnectConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: Duration::ZERO,
        max_attempts: Some(2),
    });
    let client = GatewayClient::new(GatewayEndpoint::direct(format!("ws://{addr}")), config)
        .expect("client");
    let mut events = client.start().await.expect("start");

    let termination = timeout(STEP, client.run()).await.expect("run");
    assert!(matches!(termination, Termination::Abnormal { code: None, .. }));
    assert_eq!(termination.exit_code(), 1);

    let mut reconnects = 0;
    while let Some(event) = events.recv().await {
        if matches!(event, GatewayEvent::Reconnecting { .. }) {
            reconnects += 1;
        }
    }
    assert_eq!(reconnects, 2);
}

// ============================================================================
// Heartbeats
// ============================================================================

#[tokio::test]
async fn test_missing_ack_reconnects_without_second_ping() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(100).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    // never acknowledge
    let (frames, code) = next_close_code(&mut ws).await;
    assert_eq!(code, Some(4000));
    assert_eq!(frames.len(), 1, "exactly one heartbeat on the stale transport");
    assert_eq!(frames[0].op, OpCode::Heartbeat);
    assert_eq!(frames[0].d, json!(1));

    let (_ws, resume) = gateway.accept_with_hello(45_000).await;
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["session_id"], "abc");

    client.stop().await;
}

#[tokio::test]
async fn test_acknowledged_heartbeats_keep_session() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let _events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(50).await;

    for _ in 0..4 {
        let beat = next_payload(&mut ws).await;
        assert_eq!(beat.op, OpCode::Heartbeat);
        assert_eq!(beat.d, Value::Null);
        send_json(&mut ws, json!({"op": 11})).await;
    }
    assert_eq!(client.state(), ConnectionState::Active);
    gateway.expect_no_connection(Duration::from_millis(10)).await;

    client.stop().await;
}

#[tokio::test]
async fn test_server_requested_heartbeat_is_answered() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    send_ready(&mut ws, 7, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    send_json(&mut ws, json!({"op": 1, "d": null})).await;
    let beat = next_payload(&mut ws).await;
    assert_eq!(beat.op, OpCode::Heartbeat);
    assert_eq!(beat.d, json!(7));

    client.stop().await;
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_disallowed_intent_close_is_terminal() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    close_with(&mut ws, 4014).await;

    let termination = timeout(STEP, client.run()).await.expect("run");
    assert_eq!(
        termination,
        Termination::Abnormal {
            code: Some(4014),
            reason: "disallowed intent".into()
        }
    );
    assert_eq!(termination.exit_code(), 1);
    assert_eq!(client.state(), ConnectionState::Stopped);
    assert!(!client.is_running());

    let mut last = None;
    while let Some(event) = events.recv().await {
        last = Some(event);
    }
    assert_eq!(last, Some(GatewayEvent::Stopped(termination)));
    gateway.expect_no_connection(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_stopped_event_survives_full_event_queue() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config().with_event_capacity(1));
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    close_with(&mut ws, 4014).await;

    // the consumer falls behind while the session ends
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut seen = Vec::new();
    while let Some(event) = timeout(STEP, events.recv()).await.expect("timeout") {
        seen.push(event);
    }
    let termination = timeout(STEP, client.run()).await.expect("run");
    assert!(matches!(termination, Termination::Abnormal { code: Some(4014), .. }));
    assert_eq!(seen.first(), Some(&GatewayEvent::Connected));
    assert!(matches!(seen.get(1), Some(GatewayEvent::Disconnected { .. })));
    assert_eq!(seen.last(), Some(&GatewayEvent::Stopped(termination)));
}

#[tokio::test]
async fn test_normal_server_close_is_graceful() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let _events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(45_000).await;
    close_with(&mut ws, 1000).await;

    let termination = timeout(STEP, client.run()).await.expect("run");
    assert_eq!(termination, Termination::Graceful);
    assert_eq!(termination.exit_code(), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let _events = client.start().await.expect("start");

    let second = client.start().await;
    assert!(matches!(second, Err(ClientError::AlreadyRunning)));

    client.stop().await;
    client.stop().await;
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_stop_then_start_runs_one_new_session() {
    let gateway = MockGateway::new().await;
    let client = client_for(&gateway, test_config());
    let mut events = client.start().await.expect("start");

    let (mut ws, _) = gateway.accept_with_hello(60_000).await;
    send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
    next_dispatch(&mut events).await;

    // stop while the monitor sleeps towards its first beat
    timeout(STEP, client.stop()).await.expect("stop");
    let (frames, code) = next_close_code(&mut ws).await;
    assert!(frames.is_empty());
    assert_eq!(code, Some(1000));
    assert_eq!(client.run().await, Termination::Graceful);

    let _events = client.start().await.expect("restart");
    let (mut ws, handshake) = gateway.accept_with_hello(50).await;
    assert_eq!(handshake.op, OpCode::Identify);

    // exactly one monitor: beats arrive once per interval
    let started = tokio::time::Instant::now();
    for _ in 0..3 {
        let beat = next_payload(&mut ws).await;
        assert_eq!(beat.op, OpCode::Heartbeat);
        send_json(&mut ws, json!({"op": 11})).await;
    }
    assert!(started.elapsed() >= Duration::from_millis(140));

    client.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_under_dispatch_flood_sends_normal_close() {
    for _ in 0..5 {
        let gateway = MockGateway::new().await;
        let client = client_for(&gateway, test_config());
        let mut events = client.start().await.expect("start");

        let (mut ws, _) = gateway.accept_with_hello(45_000).await;
        send_ready(&mut ws, 1, json!({"session_id": "abc"})).await;
        next_dispatch(&mut events).await;

        let (mut write, mut read) = ws.split();
        let flood = tokio::spawn(async move {
            for seq in 2u64.. {
                let frame = json!({"op": 0, "s": seq, "t": "MESSAGE_CREATE", "d": {}});
                if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        timeout(STEP, client.stop()).await.expect("stop");

        let mut code = None;
        while let Some(msg) = timeout(STEP, read.next()).await.expect("timed out waiting for close") {
            if let Ok(Message::Close(frame)) = msg {
                code = frame.map(|f| u16::from(f.code));
                break;
            }
        }
        flood.abort();
        assert_eq!(code, Some(1000));
        assert_eq!(client.run().await, Termination::Graceful);
    }
}

// ============================================================================
// Session start limit
// ============================================================================

#[tokio::test]
async fn test_exhausted_start_limit_waits_for_reset() {
    let gateway = MockGateway::new().await;
    let client = GatewayClient::new(exhausted_endpoint(&gateway, 300), test_config()).expect("client");
    let started = tokio::time::Instant::now();
    let _events = client.start().await.expect("start");

    gateway.expect_no_connection(Duration::from_millis(200)).await;
    let (_ws, identify) = gateway.accept_with_hello(45_000).await;
    assert_eq!(identify.op, OpCode::Identify);
    assert!(started.elapsed() >= Duration::from_millis(300));

    client.stop().await;
}

#[tokio::test]
async fn test_stop_during_start_limit_wait_is_graceful() {
    let gateway = MockGateway::new().await;
    let client =
        GatewayClient::new(exhausted_endpoint(&gateway, 60_000), test_config()).expect("client");
    let _events = client.start().await.expect("start");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.is_running());
    timeout(STEP, client.stop()).await.expect("stop");

    assert_eq!(client.run().await, Termination::Graceful);
    assert!(client.last_failure().is_none());
    gateway.expect_no_connection(Duration::from_millis(100)).await;
}
