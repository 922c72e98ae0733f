// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP routes and the WebSocket channel against a supervisor with mock drivers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use zapline_bus::EventBus;
use zapline_core::{ConnectionId, ConnectionStatus, DriverKind};
use zapline_gateway::{AuthConfig, GatewayState, HealthState, build_router, serve};
use zapline_supervisor::{
    Backoff, CreateRequest, Supervisor, SupervisorDeps, SupervisorSettings,
};
use zapline_test_utils::{MemoryCredentialStore, MockDriverFactory, RecordingConnectionRepository};

const TOKEN: &str = "s3cret";

struct Harness {
    state: GatewayState,
    router: Router,
    factory: Arc<MockDriverFactory>,
}

fn harness_with(token: Option<&str>, metrics: bool) -> Harness {
    let factory = Arc::new(MockDriverFactory::new());
    let supervisor = Supervisor::spawn(
        SupervisorDeps {
            factory: factory.clone(),
            credentials: Arc::new(MemoryCredentialStore::new()),
            repository: Arc::new(RecordingConnectionRepository::new()),
            bus: EventBus::new(256),
        },
        SupervisorSettings {
            backoff: Backoff::new(Duration::from_secs(5), Duration::from_secs(300)),
            close_timeout: Duration::from_secs(5),
            idle_timeout: None,
            idle_sweep: Duration::from_secs(1800),
            default_driver: DriverKind::Baileys,
        },
    );
    let render: Option<Arc<dyn Fn() -> String + Send + Sync>> = if metrics {
        Some(Arc::new(|| "zapline_active_sessions 0\n".to_string()))
    } else {
        None
    };
    let state = GatewayState::new(
        supervisor,
        AuthConfig::new(token.map(str::to_string)),
        HealthState::new(render),
    );
    let router = build_router(state.clone(), &[]);
    Harness {
        state,
        router,
        factory,
    }
}

fn harness() -> Harness {
    harness_with(Some(TOKEN), false)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn wait_for_status(state: &GatewayState, id: &str, status: ConnectionStatus) {
    let id = ConnectionId::from(id);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if state
                .supervisor
                .get_session(&id)
                .is_some_and(|s| s.status() == status)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never reached the expected status");
}

/// Create `id` and drive its mock link to Connected.
async fn connected(h: &Harness, id: &str) {
    h.state
        .supervisor
        .create_connection(CreateRequest::new(id))
        .await
        .unwrap();
    let driver = h.factory.wait_for_driver(id).await;
    assert!(driver.emit_connected("5511999999999"));
    wait_for_status(&h.state, id, ConnectionStatus::Connected).await;
}

// --- HTTP ---

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeConnections"], 0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn api_routes_require_bearer_token() {
    let h = harness();
    let anonymous = Request::builder()
        .uri("/connections")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&h.router, anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/stats")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&h.router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&h.router, get("/connections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn no_token_configured_allows_anonymous_calls() {
    let h = harness_with(None, false);
    let request = Request::builder()
        .uri("/stats")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&h.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn metrics_route_follows_exporter() {
    let disabled = harness();
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = disabled.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let enabled = harness_with(Some(TOKEN), true);
    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = enabled.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes).contains("zapline_active_sessions"));
}

#[tokio::test]
async fn create_returns_201_then_409() {
    let h = harness();
    let (status, body) = call(
        &h.router,
        post("/connections", json!({"connectionId": "c1", "driver": "web.js"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["connectionId"], "c1");
    assert_eq!(body["driver"], "webjs");

    let (status, body) = call(&h.router, post("/connections", json!({"connectionId": "c1"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_exists");

    let (status, body) = call(&h.router, get("/connections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["id"], "c1");
}

#[tokio::test]
async fn create_rejects_bad_input_with_400() {
    let h = harness();
    let (status, body) = call(
        &h.router,
        post("/connections", json!({"connectionId": "c1", "driver": "telegram"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "config_error");

    let (status, body) = call(&h.router, post("/connections", json!({"driver": "baileys"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_payload");

    let (status, body) = call(&h.router, post("/connections", json!({"connectionId": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_payload");
    assert_eq!(h.state.supervisor.active_count(), 0);
}

#[tokio::test]
async fn get_connection_returns_snapshot_or_404() {
    let h = harness();
    let (status, body) = call(&h.router, get("/connections/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    connected(&h, "c1").await;
    let (status, body) = call(&h.router, get("/connections/c1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(body["phoneNumber"], "5511999999999");
}

#[tokio::test]
async fn send_maps_errors_to_status_codes() {
    let h = harness();
    let message = json!({"to": "5511888888888", "message": "hi"});

    let (status, body) = call(&h.router, post("/connections/ghost/messages", message.clone())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    h.state
        .supervisor
        .create_connection(CreateRequest::new("pending"))
        .await
        .unwrap();
    let (status, body) =
        call(&h.router, post("/connections/pending/messages", message.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "not_connected");

    connected(&h, "c1").await;
    let (status, body) = call(&h.router, post("/connections/c1/messages", message.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["messageId"]
            .as_str()
            .is_some_and(|id| id.starts_with("mock-msg-"))
    );
    let driver = h.factory.handle("c1").unwrap();
    assert_eq!(
        driver.sent_messages(),
        vec![("5511888888888".to_string(), "hi".to_string())]
    );

    driver.fail_sends("recipient not on whatsapp");
    let (status, body) = call(&h.router, post("/connections/c1/messages", message)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "send_failed");
}

#[tokio::test]
async fn disconnect_then_not_found() {
    let h = harness();
    connected(&h, "c1").await;

    let (status, _) = call(&h.router, post("/connections/c1/disconnect", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&h.router, post("/connections/c1/disconnect", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn stats_count_by_status_and_driver() {
    let h = harness();
    connected(&h, "c1").await;
    h.state
        .supervisor
        .create_connection(CreateRequest::new("c2").with_driver(DriverKind::WebJs))
        .await
        .unwrap();

    let (status, body) = call(&h.router, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["byStatus"]["connected"], 1);
    assert_eq!(body["byDriver"]["baileys"], 1);
    assert_eq!(body["byDriver"]["webjs"], 1);
}

// --- WebSocket ---

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn spawn_server(h: &Harness) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, h.router.clone(), shutdown.clone()));
    (format!("ws://{addr}/ws"), shutdown)
}

async fn connect(url: &str) -> Client {
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Read frames until one satisfies `matches`.
async fn wait_frame(client: &mut Client, matches: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = client
                .next()
                .await
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if matches(&value) {
                    return value;
                }
            }
        }
    })
    .await
    .expect("expected frame never arrived")
}

fn of_type(kind: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["type"] == kind
}

#[tokio::test]
async fn websocket_rejects_bad_token() {
    let h = harness();
    let (url, shutdown) = spawn_server(&h).await;
    assert!(connect_async(format!("{url}?token=wrong")).await.is_err());
    assert!(connect_async(url.as_str()).await.is_err());
    shutdown.cancel();
}

#[tokio::test]
async fn qr_code_reaches_websocket_client() {
    let h = harness();
    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}&connectionId=c1")).await;

    send_json(
        &mut client,
        json!({"type": "create_connection", "requestId": "r1", "connectionId": "c1"}),
    )
    .await;
    let ack = wait_frame(&mut client, of_type("ack")).await;
    assert_eq!(ack["requestId"], "r1");
    assert_eq!(ack["command"], "create_connection");
    assert_eq!(ack["connectionId"], "c1");
    assert_eq!(ack["data"]["status"], "initializing");

    let driver = h.factory.wait_for_driver("c1").await;
    assert!(driver.emit_qr("xyz"));
    let frame = wait_frame(&mut client, of_type("qr_code")).await;
    assert_eq!(frame, json!({"type": "qr_code", "connectionId": "c1", "qr": "xyz"}));
    shutdown.cancel();
}

#[tokio::test]
async fn command_errors_go_to_the_requester() {
    let h = harness();
    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}")).await;

    send_json(&mut client, json!({"type": "create_connection", "connectionId": "c1"})).await;
    wait_frame(&mut client, of_type("ack")).await;

    send_json(
        &mut client,
        json!({"type": "create_connection", "requestId": "r2", "connectionId": "c1"}),
    )
    .await;
    let error = wait_frame(&mut client, of_type("error")).await;
    assert_eq!(error["requestId"], "r2");
    assert_eq!(error["connectionId"], "c1");
    assert_eq!(error["code"], "already_exists");

    send_json(
        &mut client,
        json!({"type": "send_message", "requestId": "r3", "connectionId": "c1", "to": "5511", "message": "hi"}),
    )
    .await;
    let error = wait_frame(&mut client, of_type("error")).await;
    assert_eq!(error["requestId"], "r3");
    assert_eq!(error["code"], "not_connected");
    shutdown.cancel();
}

#[tokio::test]
async fn malformed_frames_get_invalid_payload() {
    let h = harness();
    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}")).await;

    client
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let error = wait_frame(&mut client, of_type("error")).await;
    assert_eq!(error["code"], "invalid_payload");
    assert!(error.get("requestId").is_none());

    send_json(
        &mut client,
        json!({"type": "send_message", "requestId": "r9", "connectionId": "c1"}),
    )
    .await;
    let error = wait_frame(&mut client, of_type("error")).await;
    assert_eq!(error["code"], "invalid_payload");
    assert_eq!(error["requestId"], "r9");
    shutdown.cancel();
}

#[tokio::test]
async fn new_client_gets_current_state_replayed() {
    let h = harness();
    h.state
        .supervisor
        .create_connection(CreateRequest::new("c1"))
        .await
        .unwrap();
    let driver = h.factory.wait_for_driver("c1").await;
    assert!(driver.emit_qr("xyz"));
    wait_for_status(&h.state, "c1", ConnectionStatus::AwaitingScan).await;
    connected(&h, "c2").await;

    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}&connectionId=c1")).await;

    let status = wait_frame(&mut client, of_type("connection_status")).await;
    assert_eq!(status["connectionId"], "c1");
    assert_eq!(status["status"], "qr_ready");
    let qr = wait_frame(&mut client, of_type("qr_code")).await;
    assert_eq!(qr["qr"], "xyz");
    shutdown.cancel();
}

#[tokio::test]
async fn status_command_and_message_sent_event() {
    let h = harness();
    connected(&h, "c1").await;
    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}")).await;

    send_json(
        &mut client,
        json!({"type": "get_connection_status", "requestId": "s1", "connectionId": "c1"}),
    )
    .await;
    let ack = wait_frame(&mut client, |v| v["type"] == "ack" && v["requestId"] == "s1").await;
    assert_eq!(ack["data"]["status"], "connected");

    send_json(
        &mut client,
        json!({"type": "send_message", "requestId": "s2", "connectionId": "c1", "to": "5511888888888", "message": "hello"}),
    )
    .await;
    let ack = wait_frame(&mut client, |v| v["type"] == "ack" && v["requestId"] == "s2").await;
    let message_id = ack["data"]["messageId"].as_str().unwrap().to_string();

    let sent = wait_frame(&mut client, of_type("message_sent")).await;
    assert_eq!(sent["connectionId"], "c1");
    assert_eq!(sent["message"]["id"], message_id.as_str());
    assert_eq!(sent["message"]["body"], "hello");
    shutdown.cancel();
}

#[tokio::test]
async fn slow_send_does_not_hold_up_later_commands() {
    let h = harness();
    connected(&h, "c1").await;
    h.factory
        .handle("c1")
        .unwrap()
        .delay_sends(Duration::from_secs(60));
    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}")).await;

    send_json(
        &mut client,
        json!({"type": "send_message", "requestId": "slow", "connectionId": "c1", "to": "5511", "message": "hi"}),
    )
    .await;
    send_json(
        &mut client,
        json!({"type": "get_connection_status", "requestId": "quick", "connectionId": "c1"}),
    )
    .await;

    let reply = wait_frame(&mut client, |v| v["type"] == "ack" || v["type"] == "error").await;
    assert_eq!(reply["type"], "ack");
    assert_eq!(reply["requestId"], "quick");
    assert_eq!(reply["data"]["status"], "connected");
    shutdown.cancel();
}

#[tokio::test]
async fn closing_the_socket_releases_its_slot() {
    let h = harness();
    let (url, shutdown) = spawn_server(&h).await;
    let mut client = connect(&format!("{url}?token={TOKEN}")).await;
    send_json(&mut client, json!({"type": "get_connection_status", "connectionId": "x"})).await;
    wait_frame(&mut client, of_type("error")).await;
    assert_eq!(h.state.ws_client_count(), 1);
    assert_eq!(h.state.supervisor.bus().subscriber_count(), 1);

    client.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.state.ws_client_count() > 0 || h.state.supervisor.bus().subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("websocket state was not cleaned up");
    shutdown.cancel();
}
