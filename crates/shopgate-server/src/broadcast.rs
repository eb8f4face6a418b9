//! Fan-out of state-change events to connected admin observers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use shopgate_proto::AdminEvent;

use crate::registry::Outbound;

/// Registry of admin observers. Events are serialized once and pushed
/// to every observer whose channel can accept them; observers that are
/// gone or lagging are skipped silently, since a reconnecting dashboard
/// gets a full snapshot at auth time anyway.
#[derive(Clone, Default)]
pub struct AdminBroadcaster {
    observers: Arc<RwLock<HashMap<u64, Outbound>>>,
    next_id: Arc<AtomicU64>,
}

impl AdminBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer; returns the id used to unregister it.
    pub async fn register(&self, outbound: Outbound) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().await.insert(id, outbound);
        debug!(observer_id = id, "Admin observer registered");
        id
    }

    /// Remove an observer; idempotent.
    pub async fn unregister(&self, id: u64) {
        if self.observers.write().await.remove(&id).is_some() {
            debug!(observer_id = id, "Admin observer unregistered");
        }
    }

    /// Serialize the event once and push it to every observer.
    pub async fn broadcast(&self, event: &AdminEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize admin event");
                return;
            }
        };

        let observers = self.observers.read().await;
        for outbound in observers.values() {
            // A full or closed channel means the observer is gone or
            // lagging; the next event (or a reconnect snapshot) covers it.
            let _ = outbound.try_send(Message::Text(text.clone()));
        }
    }

    /// Count of connected observers.
    pub async fn count(&self) -> usize {
        self.observers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use tokio::sync::mpsc;

    use super::*;

    fn device_status_event() -> AdminEvent {
        AdminEvent::DeviceStatus {
            resource_id: "DOOR01".into(),
            status: shopgate_proto::ConnectionStatus::Online,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_observers() {
        let broadcaster = AdminBroadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        broadcaster.register(tx1).await;
        broadcaster.register(tx2).await;

        broadcaster.broadcast(&device_status_event()).await;

        for rx in [&mut rx1, &mut rx2] {
            let msg = rx.recv().await.unwrap();
            let Message::Text(text) = msg else {
                panic!("expected text frame");
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "device_status");
            assert_eq!(value["status"], "online");
        }
    }

    #[tokio::test]
    async fn unregistered_observer_is_skipped() {
        let broadcaster = AdminBroadcaster::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = broadcaster.register(tx).await;
        broadcaster.unregister(id).await;
        broadcaster.unregister(id).await; // idempotent

        broadcaster.broadcast(&device_status_event()).await;
        assert_eq!(broadcaster.count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_does_not_fail_broadcast() {
        let broadcaster = AdminBroadcaster::new();
        let (dead_tx, dead_rx) = mpsc::channel(4);
        drop(dead_rx);
        let (live_tx, mut live_rx) = mpsc::channel(4);
        broadcaster.register(dead_tx).await;
        broadcaster.register(live_tx).await;

        broadcaster.broadcast(&device_status_event()).await;
        assert!(live_rx.recv().await.is_some());
    }
}
