//! Per-resource serialization of the session check-then-act.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async mutex map. The open-session check and the conditional
/// write that follows it must not interleave for the same resource, or
/// two near-simultaneous scans could both start (or both end) a
/// session. One entry per resource; the map is bounded by the number
/// of resources that ever see a scan.
#[derive(Clone, Default)]
pub struct SessionGate {
    locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one resource, creating it on first use.
    pub async fn acquire(&self, resource_id: i64) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.lock().await.entry(resource_id).or_default());
        lock.lock_owned().await
    }
}
