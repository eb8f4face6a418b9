//! Heartbeat liveness monitor.
//!
//! Devices must heartbeat (or scan) within the timeout window; anything
//! quieter gets evicted from the registry, closed, marked offline, and
//! announced to admins. The later TCP-level disconnect of an evicted
//! device finds its registry slot already gone and does nothing.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use shopgate_proto::{AdminEvent, ConnectionStatus};

use crate::broadcast::AdminBroadcaster;
use crate::registry::DeviceRegistry;
use crate::storage::Database;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// Spawn the periodic sweep task. Runs until the shutdown signal fires.
pub fn spawn_liveness_monitor(
    registry: DeviceRegistry,
    db: Database,
    broadcaster: AdminBroadcaster,
    period: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut timer = tokio::time::interval(period);
        // The first tick fires immediately; skip it so devices that
        // just reconnected after a restart get a full window.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => sweep(&registry, &db, &broadcaster, timeout_ms).await,
                _ = shutdown.changed() => {
                    info!("Liveness monitor shutting down");
                    return;
                }
            }
        }
    })
}

/// One pass over the registry, evicting every device whose last
/// heartbeat is older than the timeout.
pub(crate) async fn sweep(
    registry: &DeviceRegistry,
    db: &Database,
    broadcaster: &AdminBroadcaster,
    timeout_ms: i64,
) {
    for conn in registry.stale_devices(timeout_ms).await {
        // The device may have re-registered between the snapshot and
        // now; only evict the exact connection we saw as stale.
        if !registry.unregister(&conn.resource_id, conn.conn_id).await {
            continue;
        }

        warn!(resource_id = %conn.resource_id, conn_id = conn.conn_id, "Heartbeat lapsed, evicting device");
        let _ = conn.outbound.try_send(Message::Close(None));

        if let Err(e) = db
            .set_connection_status(&conn.resource_id, ConnectionStatus::Offline)
            .await
        {
            warn!(resource_id = %conn.resource_id, error = %e, "Failed to persist offline status");
        }
        broadcaster
            .broadcast(&AdminEvent::DeviceStatus {
                resource_id: conn.resource_id.clone(),
                status: ConnectionStatus::Offline,
            })
            .await;
    }
}
