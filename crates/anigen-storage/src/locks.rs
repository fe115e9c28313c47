//! Per-project write locks.
//!
//! Every mutating store operation holds its project's lock for the whole
//! load-archive-write sequence, so saves for one project are totally ordered
//! within the process and no read-modify-write is interleaved with another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use anigen_models::ProjectId;

/// Lock table shared by every store created from one repository.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `project_id`.
    pub async fn acquire(&self, project_id: &ProjectId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(project_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop table entries nobody holds or waits on.
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before - locks.len();
        if removed > 0 {
            debug!(removed, remaining = locks.len(), "Pruned idle project locks");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
