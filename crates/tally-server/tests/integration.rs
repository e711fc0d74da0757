//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tally_broker::{BrokerHost, ChannelMode};
use tally_server::config::ServerConfig;
use tally_server::server::TallyServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a test server on an auto-assigned port.
async fn boot_server_with(mode: ChannelMode, tweak: impl FnOnce(&mut ServerConfig)) -> (String, Arc<TallyServer>) {
    let mut config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    tweak(&mut config);
    let host = BrokerHost::new(mode, config.broker_config());
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .build_recorder()
        .handle();
    let server = Arc::new(TallyServer::new(config, host, Some(metrics_handle)));
    let (addr, _handle) = server.listen().await.unwrap();
    (addr.to_string(), server)
}

async fn boot_server() -> (String, Arc<TallyServer>) {
    boot_server_with(ChannelMode::Shared, |_| {}).await
}

/// Connect and consume `connection.established`, returning its data.
async fn connect(addr: &str) -> (WsStream, Value) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let established = read_json(&mut ws).await;
    assert_eq!(established["type"], "connection.established");
    (ws, established["data"].clone())
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until one with `type == "callback"` for `callback_id` arrives.
async fn read_callback(ws: &mut WsStream, callback_id: &str) -> Value {
    loop {
        let frame = read_json(ws).await;
        if frame["type"] == "callback" && frame["callbackId"] == callback_id {
            return frame;
        }
    }
}

/// Send a request and read frames until its response arrives.
async fn rpc_call(ws: &mut WsStream, id: &str, method: &str, params: Option<Value>) -> Value {
    let mut req = json!({"id": id, "method": method});
    if let Some(p) = params {
        req["params"] = p;
    }
    ws.send(Message::text(req.to_string())).await.unwrap();

    loop {
        let parsed = read_json(ws).await;
        if parsed.get("id").and_then(Value::as_str) == Some(id) {
            return parsed;
        }
    }
}

async fn subscribe(ws: &mut WsStream, event: &str, callback_id: &str) -> String {
    let resp = rpc_call(
        ws,
        &format!("sub-{callback_id}"),
        "subscribe",
        Some(json!({"eventName": event, "callbackId": callback_id})),
    )
    .await;
    assert_eq!(resp["success"], true, "{resp}");
    resp["result"]["subscriptionId"].as_str().unwrap().to_owned()
}

async fn http_get(addr: &str, path: &str) -> (u16, String) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut raw = String::new();
    let _ = timeout(TIMEOUT, stream.read_to_string(&mut raw)).await.unwrap().unwrap();
    let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
    let body = raw.split_once("\r\n\r\n").map(|(_, b)| b.to_owned()).unwrap_or_default();
    (status, body)
}

// ── Shared counter ──────────────────────────────────────────────────

#[tokio::test]
async fn two_clients_share_counter_and_receive_updates() {
    let (addr, _server) = boot_server().await;
    let (mut a, _) = connect(&addr).await;
    let (mut b, _) = connect(&addr).await;

    let _ = subscribe(&mut b, "counter-changed", "b-counter").await;

    let resp = rpc_call(&mut a, "1", "incrementBy", Some(json!({"amount": 123}))).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["result"], 123);

    let frame = read_callback(&mut b, "b-counter").await;
    assert_eq!(frame["event"], "counter-changed");
    assert_eq!(frame["payload"], 123);

    let (mut c, _) = connect(&addr).await;
    let _ = subscribe(&mut c, "counter-changed", "c-counter").await;
    let resp = rpc_call(&mut c, "2", "getCounter", None).await;
    assert_eq!(resp["result"], 123);

    let resp = rpc_call(&mut b, "3", "decrement", None).await;
    assert_eq!(resp["result"], 122);
    let frame = read_callback(&mut c, "c-counter").await;
    assert_eq!(frame["payload"], 122);
}

#[tokio::test]
async fn isolated_mode_gives_each_socket_its_own_counter() {
    let (addr, _server) = boot_server_with(ChannelMode::Isolated, |_| {}).await;
    let (mut a, a_data) = connect(&addr).await;
    let (mut b, b_data) = connect(&addr).await;
    assert_eq!(a_data["mode"], "isolated");

    let _ = rpc_call(&mut a, "1", "incrementBy", Some(json!({"amount": 5}))).await;
    let resp = rpc_call(&mut b, "2", "getCounter", None).await;
    assert_eq!(resp["result"], 0);

    let resp = rpc_call(&mut b, "3", "listEndpoints", None).await;
    assert_eq!(resp["result"], json!([b_data["endpointId"]]));
}

// ── Endpoints and lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn socket_close_removes_endpoint() {
    let (addr, _server) = boot_server().await;
    let (mut a, a_data) = connect(&addr).await;
    let (mut b, b_data) = connect(&addr).await;

    let resp = rpc_call(&mut a, "1", "listEndpoints", None).await;
    let listed = resp["result"].as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&a_data["endpointId"]));
    assert!(listed.contains(&b_data["endpointId"]));

    let _ = subscribe(&mut a, "endpoint-set-changed", "a-endpoints").await;
    b.close(None).await.unwrap();

    let frame = read_callback(&mut a, "a-endpoints").await;
    assert_eq!(frame["payload"], json!([a_data["endpointId"]]));

    let resp = rpc_call(&mut a, "2", "listEndpoints", None).await;
    assert_eq!(resp["result"], json!([a_data["endpointId"]]));
}

#[tokio::test]
async fn notify_departure_drops_endpoint_and_subscriptions() {
    let (addr, server) = boot_server().await;
    let (mut a, a_data) = connect(&addr).await;
    let _ = subscribe(&mut a, "counter-changed", "a-counter").await;

    let resp = rpc_call(
        &mut a,
        "1",
        "notifyDeparture",
        Some(json!({"endpointId": a_data["endpointId"]})),
    )
    .await;
    assert_eq!(resp["result"]["acknowledged"], true);

    let broker = server.sessions().host().shared().unwrap().clone();
    assert_eq!(broker.endpoint_count(), 0);
    assert_eq!(broker.subscription_count(), 0);

    let resp = rpc_call(
        &mut a,
        "2",
        "subscribe",
        Some(json!({"eventName": "counter-changed", "callbackId": "again"})),
    )
    .await;
    assert_eq!(resp["error"]["code"], "NOT_REGISTERED");
}

#[tokio::test]
async fn ready_delivers_init_complete_to_own_channel() {
    let (addr, _server) = boot_server_with(ChannelMode::Shared, |c| c.settle_delay = Duration::from_secs(60)).await;
    let (mut a, a_data) = connect(&addr).await;
    let _ = subscribe(&mut a, "init-complete", "a-init").await;

    let resp = rpc_call(&mut a, "1", "ready", None).await;
    assert_eq!(resp["result"]["endpointId"], a_data["endpointId"]);
    let frame = read_callback(&mut a, "a-init").await;
    assert_eq!(frame["payload"], a_data["endpointId"]);

    let resp = rpc_call(&mut a, "2", "whoAmI", None).await;
    assert_eq!(resp["result"]["state"], "active");
    assert_eq!(resp["result"]["mode"], "shared");
}

#[tokio::test]
async fn settle_delay_activates_without_ready() {
    let (addr, _server) =
        boot_server_with(ChannelMode::Shared, |c| c.settle_delay = Duration::from_millis(200)).await;
    let (mut a, a_data) = connect(&addr).await;
    let _ = subscribe(&mut a, "init-complete", "a-init").await;

    let frame = read_callback(&mut a, "a-init").await;
    assert_eq!(frame["payload"], a_data["endpointId"]);
}

// ── Errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn error_codes_reach_the_client() {
    let (addr, _server) = boot_server().await;
    let (mut a, _) = connect(&addr).await;

    let resp = rpc_call(
        &mut a,
        "1",
        "subscribe",
        Some(json!({"eventName": "tick", "callbackId": "x"})),
    )
    .await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error"]["code"], "UNKNOWN_EVENT");

    let resp = rpc_call(&mut a, "2", "no.such", None).await;
    assert_eq!(resp["error"]["code"], "METHOD_NOT_FOUND");

    let resp = rpc_call(&mut a, "3", "incrementBy", Some(json!({"amount": "lots"}))).await;
    assert_eq!(resp["error"]["code"], "INVALID_PARAMS");

    a.send(Message::text("{broken")).await.unwrap();
    let resp = read_json(&mut a).await;
    assert_eq!(resp["error"]["code"], "PARSE_ERROR");

    let resp = rpc_call(&mut a, "4", "ping", None).await;
    assert_eq!(resp["result"]["pong"], true);
}

// ── HTTP surface ────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_live_connections() {
    let (addr, _server) = boot_server().await;
    let (_a, _) = connect(&addr).await;
    let (_b, _) = connect(&addr).await;

    let (status, body) = http_get(&addr, "/health").await;
    assert_eq!(status, 200);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["status"], "ok");
    assert_eq!(parsed["connections"], 2);
    assert_eq!(parsed["endpoints"], 2);
    assert_eq!(parsed["mode"], "shared");
}

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let (addr, _server) = boot_server_with(ChannelMode::Shared, |c| c.max_connections = 1).await;
    let (_a, _) = connect(&addr).await;
    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
}

#[tokio::test]
async fn shutdown_closes_open_sockets() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let host = BrokerHost::new(ChannelMode::Shared, config.broker_config());
    let server = Arc::new(TallyServer::new(config, host, None));
    let (addr, listener) = server.listen().await.unwrap();
    let addr = addr.to_string();
    let (mut a, _) = connect(&addr).await;
    let (_b, _) = connect(&addr).await;

    let drained = {
        let server = server.clone();
        tokio::spawn(async move { server.shutdown().drain(listener).await })
    };

    let ended = timeout(TIMEOUT, async {
        loop {
            match a.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());

    assert!(timeout(TIMEOUT, drained).await.unwrap().unwrap());
    assert_eq!(server.shutdown().live_sessions(), 0);
    let broker = server.sessions().host().shared().unwrap().clone();
    assert_eq!(broker.endpoint_count(), 0);
    assert_eq!(server.connections().count(), 0);
}
