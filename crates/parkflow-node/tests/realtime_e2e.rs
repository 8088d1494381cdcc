//! End-to-end tests for the node's HTTP surface and WebSocket channel.

use axum::{body::Body, http::Request};
use parkflow_node::api::{create_router, AppState};
use parkflow_node::config::ServerConfig;
use parkflow_node::{Node, NodeConfig};
use futures_util::StreamExt;
use parkflow_realtime::{
    ClientConfig, ConnectionHub, ConnectionMetadata, ConnectionStatus, Connector, Envelope,
    Filter, RealtimeClient, ServerMessage, WsConnector,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

fn create_test_app() -> (axum::Router, Arc<ConnectionHub>) {
    let hub = Arc::new(ConnectionHub::default());
    let app = create_router(AppState::new(hub.clone()), &ServerConfig::default());
    (app, hub)
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _hub) = create_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn test_realtime_stats() {
    let (app, hub) = create_test_app();

    let conn = hub.accept(ConnectionMetadata::default()).await.unwrap();
    hub.subscribe(&conn.id, "occupancy", Filter::new())
        .await
        .unwrap();
    hub.subscribe(&conn.id, "alerts", Filter::new())
        .await
        .unwrap();

    let response = app.oneshot(get("/api/realtime/stats")).await.unwrap();
    assert_eq!(response.status(), 200);

    let stats = json_body(response).await;
    assert_eq!(stats["current_connections"], 1);
    assert_eq!(stats["active_channels"], 2);
    assert_eq!(stats["total_subscriptions"], 2);
    assert_eq!(
        stats["channels"],
        json!([
            {"channel": "alerts", "subscribers": 1},
            {"channel": "occupancy", "subscribers": 1}
        ])
    );
}

#[tokio::test]
async fn test_cors_allows_dashboard_origin() {
    let (app, _hub) = create_test_app();

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}

#[tokio::test]
async fn test_unknown_route() {
    let (app, _hub) = create_test_app();
    let response = app.oneshot(get("/api/bookings")).await.unwrap();
    assert_eq!(response.status(), 404);
}

struct RunningNode {
    url: String,
    hub: Arc<ConnectionHub>,
    node_events: parkflow_node::events::ParkingEvents,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), parkflow_node::NodeError>>,
}

async fn start_node() -> RunningNode {
    let node = Node::new(NodeConfig::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hub = node.hub().clone();
    let node_events = node.events().clone();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(node.serve(listener, shutdown.clone()));

    RunningNode {
        url: format!("ws://{}/ws", addr),
        hub,
        node_events,
        shutdown,
        task,
    }
}

fn client_for(node: &RunningNode) -> RealtimeClient {
    RealtimeClient::websocket(ClientConfig {
        reconnect_delay_ms: 50,
        ..ClientConfig::new(node.url.clone())
    })
    .unwrap()
}

async fn wait_for_status(client: &RealtimeClient, status: ConnectionStatus) {
    let mut changes = client.status_changes();
    tokio::time::timeout(WAIT, changes.wait_for(|s| s.status == status))
        .await
        .expect("timed out waiting for status")
        .unwrap();
}

/// Next message matching `pred`, skipping others.
async fn next_matching(
    messages: &mut broadcast::Receiver<Envelope<ServerMessage>>,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    tokio::time::timeout(WAIT, async {
        loop {
            let envelope = messages.recv().await.unwrap();
            if pred(&envelope.message) {
                return envelope.message;
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

fn occupancy(value: u64) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("occupancy".to_string(), json!(value));
    data
}

#[tokio::test]
async fn test_websocket_subscribe_and_filtered_updates() {
    let node = start_node().await;
    let client = client_for(&node);
    let mut messages = client.messages();

    client.connect();
    wait_for_status(&client, ConnectionStatus::Connected).await;
    let greeting = next_matching(&mut messages, |m| matches!(m, ServerMessage::Connected { .. })).await;
    let ServerMessage::Connected { client_id, message } = greeting else {
        unreachable!()
    };
    assert_eq!(message, "Connected to ParkFlow real-time service");
    assert!(node.hub.is_connected(&client_id));

    client.subscribe("occupancy", Filter::new().with("lotId", "lot-001"));
    next_matching(&mut messages, |m| matches!(m, ServerMessage::Subscribed { .. })).await;
    let initial = next_matching(&mut messages, |m| matches!(m, ServerMessage::InitialData { .. })).await;
    let ServerMessage::InitialData { channel, data } = initial else {
        unreachable!()
    };
    assert_eq!(channel, "occupancy");
    assert_eq!(data["lotId"], "lot-001");
    assert_eq!(data["capacity"], 150);

    assert_eq!(node.node_events.occupancy_changed("lot-002", occupancy(1)).await, 0);
    assert_eq!(node.node_events.occupancy_changed("lot-001", occupancy(2)).await, 1);

    let update = next_matching(&mut messages, |m| matches!(m, ServerMessage::Update { .. })).await;
    let ServerMessage::Update { data, .. } = update else {
        unreachable!()
    };
    assert_eq!(data, json!({"lotId": "lot-001", "occupancy": 2}));

    node.shutdown.cancel();
    next_matching(&mut messages, |m| matches!(m, ServerMessage::ServerShutdown { .. })).await;
    tokio::time::timeout(WAIT, node.task)
        .await
        .expect("node did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_websocket_request_and_errors() {
    let node = start_node().await;
    let client = client_for(&node);
    let mut messages = client.messages();

    client.connect();
    wait_for_status(&client, ConnectionStatus::Connected).await;

    let request_id = client
        .request("snapshot", json!({"channel": "bookings"}))
        .unwrap();
    let response = next_matching(&mut messages, |m| matches!(m, ServerMessage::Response { .. })).await;
    let ServerMessage::Response { request_id: answered, data } = response else {
        unreachable!()
    };
    assert_eq!(answered, request_id);
    assert_eq!(data["status"], "ok");
    assert!(data["data"]["total"].is_u64());

    node.shutdown.cancel();
}

#[tokio::test]
async fn test_client_resubscribes_after_server_drops_connection() {
    let node = start_node().await;
    let client = client_for(&node);
    let mut messages = client.messages();

    client.connect();
    wait_for_status(&client, ConnectionStatus::Connected).await;
    client.subscribe("alerts", Filter::new());
    next_matching(&mut messages, |m| matches!(m, ServerMessage::Subscribed { .. })).await;

    let first = node.hub.subscribers_of("alerts");
    assert_eq!(first.len(), 1);

    // Server side drops the connection, as a failed send would.
    assert!(node.hub.remove(&first[0]));

    // The client reconnects on its own and restores the subscription.
    let ServerMessage::Subscribed { channel } =
        next_matching(&mut messages, |m| matches!(m, ServerMessage::Subscribed { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(channel, "alerts");
    assert_eq!(client.status().status, ConnectionStatus::Connected);

    let second = node.hub.subscribers_of("alerts");
    assert_eq!(second.len(), 1);
    assert_ne!(second[0], first[0]);

    node.node_events
        .alert_raised(json!({"lotId": "lot-001", "level": "critical"}))
        .await;
    let ServerMessage::Update { data, .. } =
        next_matching(&mut messages, |m| matches!(m, ServerMessage::Update { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(data["level"], "critical");

    node.shutdown.cancel();
}

#[tokio::test]
async fn test_removed_connection_gets_no_backlog() {
    const QUEUED: usize = 200;

    let node = start_node().await;
    let mut transport = WsConnector::new(node.url.clone()).connect().await.unwrap();

    let greeting = tokio::time::timeout(WAIT, transport.stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let ServerMessage::Connected { client_id, .. } =
        Envelope::<ServerMessage>::decode(&greeting).unwrap().message
    else {
        panic!("expected greeting, got {greeting}");
    };

    // The client stops reading while far more than the socket buffers hold
    // is queued for it.
    let bulk = "x".repeat(128 * 1024);
    for _ in 0..QUEUED {
        let update = ServerMessage::Update {
            channel: "occupancy".to_string(),
            data: json!({ "bulk": bulk }),
        };
        assert!(node.hub.send_to(&client_id, update).await);
    }
    assert!(node.hub.remove(&client_id));

    tokio::time::sleep(Duration::from_millis(500)).await;

    let received = tokio::time::timeout(WAIT, async {
        let mut received = 0;
        while let Some(Ok(_)) = transport.stream.next().await {
            received += 1;
        }
        received
    })
    .await
    .expect("stream did not end after remove");

    assert!(received < QUEUED, "received all {received} queued updates");
    node.shutdown.cancel();
}
