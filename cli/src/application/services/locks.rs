//! Keyed per-instance locks.
//!
//! Serializes read-modify-write operations on one instance while leaving
//! different instances independent.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct InstanceLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`. Released when the guard drops.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
