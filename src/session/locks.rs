//! Per-session write serialization
//!
//! The fragment path snapshots the file size, then opens and appends; two
//! concurrent fragments for the same session could interleave between the
//! snapshot and the write. A per-session mutex held across that sequence
//! closes the window. BITS clients send fragments serially, so the lock is
//! uncontended in practice.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::session::SessionId;

#[derive(Debug, Default)]
pub struct SessionLocks {
    inner: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the write lock for a session, creating it on first use.
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry for a terminated session.
    pub async fn release(&self, id: &SessionId) {
        self.inner.lock().await.remove(id);
    }
}
