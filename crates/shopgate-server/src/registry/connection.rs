//! In-memory connection registry for device liveness tracking.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use shopgate_core::db::unix_timestamp_ms;
use shopgate_proto::{ConnectionStatus, DeviceStatusEntry};

/// Outbound channel to one connection's writer task.
pub type Outbound = mpsc::Sender<Message>;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection id. The registry uses these to
/// tell a live registration apart from one that a newer `auth_device`
/// has replaced.
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// One authenticated device connection.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    /// External resource identifier this device is bound to.
    pub resource_id: String,
    /// Process-unique id of the underlying transport connection.
    pub conn_id: u64,
    /// Sender for pushing frames to the device through its writer task.
    pub outbound: Outbound,
    /// Unix milliseconds of the last heartbeat or scan.
    pub last_heartbeat: i64,
}

/// Thread-safe registry of online devices, keyed by external resource
/// id. At most one live entry per resource; registering again
/// overwrites.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, DeviceConnection>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device connection, returning any replaced entry so
    /// the caller can close the superseded transport.
    pub async fn register(
        &self,
        resource_id: &str,
        conn_id: u64,
        outbound: Outbound,
    ) -> Option<DeviceConnection> {
        let conn = DeviceConnection {
            resource_id: resource_id.to_string(),
            conn_id,
            outbound,
            last_heartbeat: unix_timestamp_ms(),
        };
        let replaced = self
            .devices
            .write()
            .await
            .insert(resource_id.to_string(), conn);
        info!(resource_id, conn_id, replaced = replaced.is_some(), "Device registered");
        replaced
    }

    /// Update the last-heartbeat timestamp. A no-op when the device is
    /// not registered; a heartbeat can race a disconnect and that is
    /// not an error.
    pub async fn touch(&self, resource_id: &str) {
        if let Some(conn) = self.devices.write().await.get_mut(resource_id) {
            conn.last_heartbeat = unix_timestamp_ms();
        }
    }

    /// Remove the entry if it still belongs to `conn_id`. Returns
    /// whether an entry was removed. Idempotent, and safe against the
    /// case where a newer connection has already taken the slot.
    pub async fn unregister(&self, resource_id: &str, conn_id: u64) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get(resource_id) {
            Some(conn) if conn.conn_id == conn_id => {
                devices.remove(resource_id);
                drop(devices);
                info!(resource_id, conn_id, "Device unregistered");
                true
            }
            _ => {
                drop(devices);
                debug!(resource_id, conn_id, "Unregister skipped, entry absent or superseded");
                false
            }
        }
    }

    /// Whether `conn_id` is still the live connection for the resource.
    pub async fn is_current(&self, resource_id: &str, conn_id: u64) -> bool {
        self.devices
            .read()
            .await
            .get(resource_id)
            .is_some_and(|c| c.conn_id == conn_id)
    }

    /// Whether any connection is registered for the resource.
    pub async fn is_online(&self, resource_id: &str) -> bool {
        self.devices.read().await.contains_key(resource_id)
    }

    /// Snapshot of all online devices, for the admin auth reply.
    pub async fn online_devices(&self) -> Vec<DeviceStatusEntry> {
        self.devices
            .read()
            .await
            .keys()
            .map(|resource_id| DeviceStatusEntry {
                resource_id: resource_id.clone(),
                status: ConnectionStatus::Online,
            })
            .collect()
    }

    /// Devices whose last heartbeat is older than `timeout_ms`.
    pub async fn stale_devices(&self, timeout_ms: i64) -> Vec<DeviceConnection> {
        let cutoff = unix_timestamp_ms() - timeout_ms;
        self.devices
            .read()
            .await
            .values()
            .filter(|conn| conn.last_heartbeat < cutoff)
            .cloned()
            .collect()
    }

    /// Count of online devices.
    pub async fn count(&self) -> usize {
        self.devices.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn outbound() -> Outbound {
        mpsc::channel(16).0
    }

    #[tokio::test]
    async fn register_and_query() {
        let registry = DeviceRegistry::new();
        let id = next_conn_id();

        registry.register("DOOR01", id, outbound()).await;

        assert!(registry.is_online("DOOR01").await);
        assert!(registry.is_current("DOOR01", id).await);
        assert!(!registry.is_online("DOOR02").await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn reregister_replaces_previous_connection() {
        let registry = DeviceRegistry::new();
        let first = next_conn_id();
        let second = next_conn_id();

        assert!(registry.register("DOOR01", first, outbound()).await.is_none());
        let replaced = registry.register("DOOR01", second, outbound()).await;

        assert_eq!(replaced.unwrap().conn_id, first);
        assert!(!registry.is_current("DOOR01", first).await);
        assert!(registry.is_current("DOOR01", second).await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn unregister_requires_matching_conn_id() {
        let registry = DeviceRegistry::new();
        let first = next_conn_id();
        let second = next_conn_id();

        registry.register("DOOR01", first, outbound()).await;
        registry.register("DOOR01", second, outbound()).await;

        // The superseded connection's cleanup must not evict the new one.
        assert!(!registry.unregister("DOOR01", first).await);
        assert!(registry.is_online("DOOR01").await);

        assert!(registry.unregister("DOOR01", second).await);
        assert!(!registry.is_online("DOOR01").await);
        // Idempotent
        assert!(!registry.unregister("DOOR01", second).await);
    }

    #[tokio::test]
    async fn touch_is_noop_for_unknown_device() {
        let registry = DeviceRegistry::new();
        registry.touch("GHOST1").await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn stale_devices_filters_by_heartbeat_age() {
        let registry = DeviceRegistry::new();
        registry.register("DOOR01", next_conn_id(), outbound()).await;

        assert!(registry.stale_devices(60_000).await.is_empty());

        // Anything is stale against a negative timeout window.
        let stale = registry.stale_devices(-1_000).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].resource_id, "DOOR01");
    }
}
