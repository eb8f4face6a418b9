//! End-to-end protocol tests over a real WebSocket connection.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use shopgate_proto::ResourceKind;
use shopgate_server::monitor::spawn_liveness_monitor;
use shopgate_server::server::{self, ServerContext};
use shopgate_server::storage::Database;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    db: Database,
    ctx: Arc<ServerContext>,
    shutdown: watch::Sender<bool>,
    _tmp: tempfile::TempDir,
}

async fn start_server() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let db = Database::open(&tmp.path().join("shopgate.db")).await.unwrap();
    let ctx = Arc::new(ServerContext::new(db.clone()));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        let _ = server::run(listener, accept_ctx, shutdown_rx).await;
    });

    Harness {
        addr,
        db,
        ctx,
        shutdown,
        _tmp: tmp,
    }
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut WsClient, value: &Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv_frame(ws: &mut WsClient) -> Message {
    tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .unwrap()
}

async fn recv(ws: &mut WsClient) -> Value {
    loop {
        match recv_frame(ws).await {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn device_lifecycle_over_websocket() {
    let h = start_server().await;
    let admin = h.db.create_admin("admin", "correct horse").await.unwrap();
    let door = h
        .db
        .create_resource("Front Door", ResourceKind::Door, false, None)
        .await
        .unwrap();
    let alice = h
        .db
        .create_user("Alice", "AA11BB22", "alice@example.com")
        .await
        .unwrap();
    h.db.grant_permission(alice.id, door.id).await.unwrap();

    let mut ws = connect(h.addr).await;

    // Legacy firmware field names must keep working.
    send(
        &mut ws,
        &json!({
            "type": "auth_device",
            "api_key": admin.api_key,
            "device_id": door.resource_id,
        }),
    )
    .await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "auth_success");
    assert_eq!(reply["resource"]["resource_id"], json!(door.resource_id));
    assert_eq!(reply["resource"]["type"], "door");

    send(&mut ws, &json!({"type": "ping"})).await;
    assert_eq!(recv(&mut ws).await["type"], "heartbeat_ack");

    send(&mut ws, &json!({"type": "rfid_scan", "rfid": "AA11BB22"})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "access_granted");
    assert_eq!(reply["user"], "Alice");

    send(&mut ws, &json!({"type": "rfid_scan", "rfid_code": "FFFF0000"})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "access_denied");
    assert_eq!(reply["reason"], "Unknown RFID");

    // Both scans landed in the ledger, newest first.
    let logs = h.db.recent_logs(Some(door.id), 10).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(!logs[0].success);
    assert!(logs[1].success);

    let _ = h.shutdown.send(true);
}

#[tokio::test]
async fn machine_session_toggles_over_websocket() {
    let h = start_server().await;
    let admin = h.db.create_admin("admin", "correct horse").await.unwrap();
    let lathe = h
        .db
        .create_resource("Lathe", ResourceKind::Machine, true, Some("workshop"))
        .await
        .unwrap();
    let alice = h
        .db
        .create_user("Alice", "AA11BB22", "alice@example.com")
        .await
        .unwrap();
    h.db.grant_permission(alice.id, lathe.id).await.unwrap();

    let mut ws = connect(h.addr).await;
    send(
        &mut ws,
        &json!({
            "type": "auth_device",
            "api_key": admin.api_key,
            "resource_id": lathe.resource_id,
        }),
    )
    .await;
    assert_eq!(recv(&mut ws).await["type"], "auth_success");

    send(&mut ws, &json!({"type": "rfid_scan", "rfid_code": "AA11BB22"})).await;
    let started = recv(&mut ws).await;
    assert_eq!(started["type"], "session_started");
    assert_eq!(started["user"], "Alice");
    let session_id = started["session_id"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    // The same card scanned again closes the session.
    send(&mut ws, &json!({"type": "rfid_scan", "rfid_code": "AA11BB22"})).await;
    let ended = recv(&mut ws).await;
    assert_eq!(ended["type"], "session_ended");
    assert_eq!(ended["session_id"], json!(session_id));
    assert_eq!(ended["user"], "Alice");

    let logs = h.db.recent_logs(Some(lathe.id), 10).await.unwrap();
    let session = logs
        .iter()
        .find(|r| r.session_id.as_deref() == Some(session_id.as_str()))
        .unwrap();
    assert!(session.session_end.is_some());
    assert_eq!(session.usage_minutes, 0);
    assert_eq!(session.reason, "Session completed");

    let _ = h.shutdown.send(true);
}

#[tokio::test]
async fn admin_feed_over_websocket() {
    let h = start_server().await;
    let admin = h.db.create_admin("admin", "correct horse").await.unwrap();
    let door = h
        .db
        .create_resource("Front Door", ResourceKind::Door, false, None)
        .await
        .unwrap();

    let mut dashboard = connect(h.addr).await;
    send(
        &mut dashboard,
        &json!({"type": "auth_admin", "api_key": admin.api_key}),
    )
    .await;
    let reply = recv(&mut dashboard).await;
    assert_eq!(reply["type"], "auth_success");
    assert_eq!(reply["admin"]["username"], "admin");
    assert_eq!(reply["online_devices"], json!([]));

    let mut device = connect(h.addr).await;
    send(
        &mut device,
        &json!({
            "type": "auth_device",
            "api_key": admin.api_key,
            "resource_id": door.resource_id,
        }),
    )
    .await;
    assert_eq!(recv(&mut device).await["type"], "auth_success");

    let online = recv(&mut dashboard).await;
    assert_eq!(online["type"], "device_status");
    assert_eq!(online["resource_id"], json!(door.resource_id));
    assert_eq!(online["status"], "online");

    // A denial at the device shows up on the feed.
    send(&mut device, &json!({"type": "rfid_scan", "rfid_code": "FFFF0000"})).await;
    assert_eq!(recv(&mut device).await["type"], "access_denied");

    let event = recv(&mut dashboard).await;
    assert_eq!(event["type"], "access_event");
    assert_eq!(event["resource_id"], json!(door.resource_id));
    assert_eq!(event["success"], json!(false));
    assert_eq!(event["reason"], "Unknown RFID");

    // Device disconnect reaches the feed as an offline transition.
    device.close(None).await.unwrap();
    let offline = recv(&mut dashboard).await;
    assert_eq!(offline["type"], "device_status");
    assert_eq!(offline["status"], "offline");

    let _ = h.shutdown.send(true);
}

#[tokio::test]
async fn malformed_input_leaves_connection_usable() {
    let h = start_server().await;
    let admin = h.db.create_admin("admin", "correct horse").await.unwrap();
    let door = h
        .db
        .create_resource("Front Door", ResourceKind::Door, false, None)
        .await
        .unwrap();

    let mut ws = connect(h.addr).await;

    ws.send(Message::Text("not json at all".into())).await.unwrap();
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Invalid message format");

    send(&mut ws, &json!({"type": "rfid_scan", "rfid_code": "AA11BB22"})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Not authenticated");

    // The connection survives both and can still authenticate.
    send(
        &mut ws,
        &json!({
            "type": "auth_device",
            "api_key": admin.api_key,
            "resource_id": door.resource_id,
        }),
    )
    .await;
    assert_eq!(recv(&mut ws).await["type"], "auth_success");

    let _ = h.shutdown.send(true);
}

#[tokio::test]
async fn silent_device_is_evicted_by_liveness_monitor() {
    let h = start_server().await;
    let admin = h.db.create_admin("admin", "correct horse").await.unwrap();
    let door = h
        .db
        .create_resource("Front Door", ResourceKind::Door, false, None)
        .await
        .unwrap();

    let (mon_shutdown, mon_rx) = watch::channel(false);
    let monitor = spawn_liveness_monitor(
        h.ctx.registry.clone(),
        h.db.clone(),
        h.ctx.broadcaster.clone(),
        Duration::from_millis(50),
        Duration::from_millis(0),
        mon_rx,
    );

    let mut ws = connect(h.addr).await;
    send(
        &mut ws,
        &json!({
            "type": "auth_device",
            "api_key": admin.api_key,
            "resource_id": door.resource_id,
        }),
    )
    .await;

    // With a zero timeout the next sweep evicts us and closes the
    // socket from the server side; frames before the close (the auth
    // reply) are drained.
    loop {
        match recv_frame(&mut ws).await {
            Message::Close(_) => break,
            Message::Text(_) | Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    assert!(!h.ctx.registry.is_online(&door.resource_id).await);
    let stored = h
        .db
        .get_resource_by_rid(&door.resource_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.connection_status, "offline");

    let _ = mon_shutdown.send(true);
    let _ = monitor.await;
    let _ = h.shutdown.send(true);
}
