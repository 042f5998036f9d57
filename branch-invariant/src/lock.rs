use pgdesk_branch_store::GroupId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

/// In-process mutex per property group.
///
/// Serializes default transfers, lifecycle changes, and reconciliation of the
/// same group within one process. Deployments with several processes need a
/// distributed lock keyed the same way.
#[derive(Debug, Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<GroupId, Arc<Mutex<()>>>>,
}

/// Held for as long as the group must not be touched by anyone else.
#[derive(Debug)]
pub struct GroupGuard {
    group_id: GroupId,
    _guard: OwnedMutexGuard<()>,
}

impl GroupGuard {
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, group_id: &GroupId) -> GroupGuard {
        let mutex = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on can go.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            locks.entry(group_id.clone()).or_default().clone()
        };
        GroupGuard {
            group_id: group_id.clone(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of groups currently locked or awaited.
    pub async fn tracked(&self) -> usize {
        let locks = self.locks.lock().await;
        locks
            .values()
            .filter(|mutex| Arc::strong_count(mutex) > 1)
            .count()
    }
}
