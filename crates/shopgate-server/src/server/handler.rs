//! The per-connection protocol state machine.
//!
//! A connection starts unauthenticated and settles into one of two
//! roles, device or admin, on its first successful auth. Re-sending
//! the auth message for the same role re-runs authentication; crossing
//! roles on a live connection is rejected.

use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use shopgate_proto::{AdminDescriptor, AdminEvent, ClientMessage, ConnectionStatus, ServerMessage};

use crate::registry::Outbound;

use super::ServerContext;

pub const ERR_NOT_AUTHENTICATED: &str = "Not authenticated";
pub const ERR_INVALID_API_KEY: &str = "Invalid API key";
pub const ERR_INVALID_RESOURCE: &str = "Invalid resource ID";
pub const ERR_INTERNAL: &str = "Internal error";

/// Role a connection has settled into.
#[derive(Debug)]
pub enum ConnState {
    Unauthenticated,
    Device(DeviceCtx),
    Admin(AdminCtx),
}

/// Binding of an authenticated device connection to its resource.
#[derive(Debug, Clone)]
pub struct DeviceCtx {
    /// External resource identifier.
    pub resource_id: String,
    /// Internal row id, used for session bookkeeping.
    pub resource_db_id: i64,
    /// Transport connection id; must match the registry entry for
    /// device actions to be honored.
    pub conn_id: u64,
}

/// An authenticated admin observer.
#[derive(Debug)]
pub struct AdminCtx {
    pub observer_id: u64,
    pub username: String,
}

/// Push a message to this connection's writer task. A failed send
/// means the transport is gone; disconnect cleanup covers that path.
pub async fn send(outbound: &Outbound, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(text) => {
            let _ = outbound.send(Message::Text(text)).await;
        }
        Err(e) => error!(error = %e, "Failed to serialize server message"),
    }
}

/// Dispatch one parsed client message against the connection state.
pub async fn handle_message(
    ctx: &ServerContext,
    conn_id: u64,
    state: &mut ConnState,
    outbound: &Outbound,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::AuthDevice {
            api_key,
            resource_id,
        } => auth_device(ctx, conn_id, state, outbound, &api_key, &resource_id).await,
        ClientMessage::AuthAdmin { api_key } => {
            auth_admin(ctx, state, outbound, &api_key).await;
        }
        ClientMessage::Heartbeat => heartbeat(ctx, state, outbound).await,
        ClientMessage::RfidScan { rfid_code } => rfid_scan(ctx, state, outbound, &rfid_code).await,
        ClientMessage::SessionEnd { session_id } => {
            session_end(ctx, state, outbound, &session_id).await;
        }
        ClientMessage::StatusUpdate { status } => status_update(ctx, state, outbound, status).await,
    }
}

async fn auth_device(
    ctx: &ServerContext,
    conn_id: u64,
    state: &mut ConnState,
    outbound: &Outbound,
    api_key: &str,
    resource_id: &str,
) {
    if matches!(state, ConnState::Admin(_)) {
        send(outbound, &ServerMessage::error("Already authenticated as admin")).await;
        return;
    }

    match ctx.db.verify_api_key(api_key).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!(resource_id, "Device auth rejected, unknown API key");
            send(outbound, &ServerMessage::auth_error(ERR_INVALID_API_KEY)).await;
            return;
        }
        Err(e) => {
            error!(resource_id, error = %e, "Device auth lookup failed");
            send(outbound, &ServerMessage::auth_error(ERR_INTERNAL)).await;
            return;
        }
    }

    let resource = match ctx.db.get_resource_by_rid(resource_id).await {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            warn!(resource_id, "Device auth rejected, unknown resource");
            send(outbound, &ServerMessage::auth_error(ERR_INVALID_RESOURCE)).await;
            return;
        }
        Err(e) => {
            error!(resource_id, error = %e, "Resource lookup failed");
            send(outbound, &ServerMessage::auth_error(ERR_INTERNAL)).await;
            return;
        }
    };

    // Re-auth against a different resource releases the old binding.
    if let ConnState::Device(prev) = std::mem::replace(state, ConnState::Unauthenticated) {
        if prev.resource_id != resource.resource_id {
            release_device(ctx, &prev).await;
        }
    }

    if let Some(replaced) = ctx
        .registry
        .register(&resource.resource_id, conn_id, outbound.clone())
        .await
    {
        // Another transport held this resource; close it. Its cleanup
        // will see the registry slot is no longer its own and skip the
        // offline transition.
        if replaced.conn_id != conn_id {
            info!(
                resource_id = %resource.resource_id,
                old_conn_id = replaced.conn_id,
                "Closing superseded device connection"
            );
            let _ = replaced.outbound.send(Message::Close(None)).await;
        }
    }

    if let Err(e) = ctx
        .db
        .set_connection_status(&resource.resource_id, ConnectionStatus::Online)
        .await
    {
        warn!(resource_id = %resource.resource_id, error = %e, "Failed to persist online status");
    }

    info!(resource_id = %resource.resource_id, conn_id, "Device authenticated");
    send(outbound, &ServerMessage::device_auth_success(resource.descriptor())).await;
    ctx.broadcaster
        .broadcast(&AdminEvent::DeviceStatus {
            resource_id: resource.resource_id.clone(),
            status: ConnectionStatus::Online,
        })
        .await;

    *state = ConnState::Device(DeviceCtx {
        resource_id: resource.resource_id,
        resource_db_id: resource.id,
        conn_id,
    });
}

async fn auth_admin(ctx: &ServerContext, state: &mut ConnState, outbound: &Outbound, api_key: &str) {
    if matches!(state, ConnState::Device(_)) {
        send(outbound, &ServerMessage::error("Already authenticated as device")).await;
        return;
    }

    let admin = match ctx.db.verify_api_key(api_key).await {
        Ok(Some(admin)) => admin,
        Ok(None) => {
            warn!("Admin auth rejected, unknown API key");
            send(outbound, &ServerMessage::auth_error(ERR_INVALID_API_KEY)).await;
            return;
        }
        Err(e) => {
            error!(error = %e, "Admin auth lookup failed");
            send(outbound, &ServerMessage::auth_error(ERR_INTERNAL)).await;
            return;
        }
    };

    // Re-auth replaces the previous observer registration.
    if let ConnState::Admin(prev) = state {
        ctx.broadcaster.unregister(prev.observer_id).await;
    }

    let observer_id = ctx.broadcaster.register(outbound.clone()).await;
    let online_devices = ctx.registry.online_devices().await;

    info!(admin = %admin.username, observer_id, "Admin authenticated");
    send(
        outbound,
        &ServerMessage::admin_auth_success(
            AdminDescriptor {
                id: admin.id,
                username: admin.username.clone(),
            },
            online_devices,
        ),
    )
    .await;

    *state = ConnState::Admin(AdminCtx {
        observer_id,
        username: admin.username,
    });
}

async fn heartbeat(ctx: &ServerContext, state: &mut ConnState, outbound: &Outbound) {
    if matches!(state, ConnState::Admin(_)) {
        send(outbound, &ServerMessage::HeartbeatAck).await;
        return;
    }

    // Device heartbeats go through the same currency check as every
    // other device action; a superseded transport must not keep the
    // replacement's registration fresh.
    let Some(dev) = require_device(ctx, state, outbound).await else {
        return;
    };
    ctx.registry.touch(&dev.resource_id).await;
    send(outbound, &ServerMessage::HeartbeatAck).await;
}

async fn rfid_scan(ctx: &ServerContext, state: &mut ConnState, outbound: &Outbound, rfid: &str) {
    let Some(dev) = require_device(ctx, state, outbound).await else {
        return;
    };

    // A scan proves the device is alive just as well as a heartbeat.
    ctx.registry.touch(&dev.resource_id).await;

    let outcome = ctx.engine.handle_scan(&dev.resource_id, rfid).await;
    send(outbound, &outcome.response).await;
    if let Some(event) = outcome.event {
        ctx.broadcaster.broadcast(&event).await;
    }
}

async fn session_end(
    ctx: &ServerContext,
    state: &mut ConnState,
    outbound: &Outbound,
    session_id: &str,
) {
    let Some(dev) = require_device(ctx, state, outbound).await else {
        return;
    };

    let outcome = ctx
        .engine
        .end_session(dev.resource_db_id, &dev.resource_id, session_id)
        .await;
    send(outbound, &outcome.response).await;
    if let Some(event) = outcome.event {
        ctx.broadcaster.broadcast(&event).await;
    }
}

async fn status_update(
    ctx: &ServerContext,
    state: &mut ConnState,
    outbound: &Outbound,
    status: serde_json::Map<String, serde_json::Value>,
) {
    let Some(dev) = require_device(ctx, state, outbound).await else {
        return;
    };

    debug!(resource_id = %dev.resource_id, "Forwarding device status update");
    ctx.broadcaster
        .broadcast(&AdminEvent::DeviceStatusUpdate {
            resource_id: dev.resource_id,
            status,
        })
        .await;
}

/// Resolve the device binding for an action, demoting the connection
/// back to unauthenticated when a newer `auth_device` has taken over
/// its resource.
async fn require_device(
    ctx: &ServerContext,
    state: &mut ConnState,
    outbound: &Outbound,
) -> Option<DeviceCtx> {
    let dev = match state {
        ConnState::Device(dev) => dev.clone(),
        _ => {
            send(outbound, &ServerMessage::error(ERR_NOT_AUTHENTICATED)).await;
            return None;
        }
    };

    if ctx.registry.is_current(&dev.resource_id, dev.conn_id).await {
        Some(dev)
    } else {
        debug!(
            resource_id = %dev.resource_id,
            conn_id = dev.conn_id,
            "Connection superseded, demoting to unauthenticated"
        );
        *state = ConnState::Unauthenticated;
        send(outbound, &ServerMessage::error(ERR_NOT_AUTHENTICATED)).await;
        None
    }
}

/// Tear down whatever the connection registered when its transport
/// goes away.
pub async fn handle_disconnect(ctx: &ServerContext, state: ConnState) {
    match state {
        ConnState::Unauthenticated => {}
        ConnState::Device(dev) => release_device(ctx, &dev).await,
        ConnState::Admin(admin) => {
            debug!(admin = %admin.username, "Admin observer disconnected");
            ctx.broadcaster.unregister(admin.observer_id).await;
        }
    }
}

/// Drop a device binding. The offline transition only happens when
/// this connection still owned the registry slot; a superseded
/// connection leaves the newer one's online state alone.
async fn release_device(ctx: &ServerContext, dev: &DeviceCtx) {
    if !ctx.registry.unregister(&dev.resource_id, dev.conn_id).await {
        return;
    }

    if let Err(e) = ctx
        .db
        .set_connection_status(&dev.resource_id, ConnectionStatus::Offline)
        .await
    {
        warn!(resource_id = %dev.resource_id, error = %e, "Failed to persist offline status");
    }
    ctx.broadcaster
        .broadcast(&AdminEvent::DeviceStatus {
            resource_id: dev.resource_id.clone(),
            status: ConnectionStatus::Offline,
        })
        .await;
}
