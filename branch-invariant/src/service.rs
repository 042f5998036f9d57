use crate::config::InvariantConfig;
use crate::error::InvariantError;
use crate::error::Result;
use crate::inspector::ClassifiedIndex;
use crate::lifecycle::BranchLifecycle;
use crate::lifecycle::DependentProbe;
use crate::lifecycle::NewBranch;
use crate::lock::GroupLocks;
use crate::manager::DefaultInvariantManager;
use crate::reconciler::DuplicateReconciler;
use crate::reconciler::ReconcileSummary;
use crate::repair::IndexRepairAgent;
use crate::repair::RepairReport;
use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::BranchRecord;
use pgdesk_branch_store::BranchStore;
use pgdesk_branch_store::GroupId;
use pgdesk_branch_store::IndexCatalog;
use std::sync::Arc;

/// Everything the branch handlers and the maintenance job call, wired over
/// one collection. Unlike the bare manager and reconciler, every entry point
/// here takes the group lock.
pub struct BranchInvariants {
    store: Arc<dyn BranchStore>,
    locks: Arc<GroupLocks>,
    manager: Arc<DefaultInvariantManager>,
    reconciler: DuplicateReconciler,
    lifecycle: BranchLifecycle,
}

impl BranchInvariants {
    pub fn new<S>(store: Arc<S>, config: InvariantConfig) -> Result<Self>
    where
        S: BranchStore + IndexCatalog + 'static,
    {
        config.validate().map_err(InvariantError::Config)?;

        let locks = Arc::new(GroupLocks::new());
        let agent = IndexRepairAgent::new(store.clone(), &config);
        let manager = Arc::new(DefaultInvariantManager::new(store.clone(), agent, config));
        let reconciler = DuplicateReconciler::new(store.clone());
        let lifecycle = BranchLifecycle::new(store.clone(), manager.clone(), locks.clone());

        Ok(Self {
            store,
            locks,
            manager,
            reconciler,
            lifecycle,
        })
    }

    pub fn with_dependent_probe(mut self, probe: Arc<dyn DependentProbe>) -> Self {
        self.lifecycle = self.lifecycle.with_dependent_probe(probe);
        self
    }

    pub fn manager(&self) -> &DefaultInvariantManager {
        &self.manager
    }

    pub fn reconciler(&self) -> &DuplicateReconciler {
        &self.reconciler
    }

    pub fn lifecycle(&self) -> &BranchLifecycle {
        &self.lifecycle
    }

    pub fn locks(&self) -> &GroupLocks {
        &self.locks
    }

    pub async fn get(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        self.store
            .get(branch_id)
            .await?
            .ok_or(InvariantError::NotFound(*branch_id))
    }

    pub async fn list(&self, group_id: &GroupId, include_inactive: bool) -> Result<Vec<BranchRecord>> {
        let records = if include_inactive {
            self.store.list_group(group_id).await?
        } else {
            self.store.list_active(group_id).await?
        };
        Ok(records)
    }

    pub async fn set_default(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        let record = self.get(branch_id).await?;
        let _guard = self.locks.lock(&record.group_id).await;
        self.manager.set_default(branch_id).await
    }

    pub async fn create(&self, group_id: &GroupId, new_branch: NewBranch) -> Result<BranchRecord> {
        self.lifecycle.create(group_id, new_branch).await
    }

    pub async fn activate(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        self.lifecycle.activate(branch_id).await
    }

    pub async fn deactivate(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        self.lifecycle.deactivate(branch_id).await
    }

    pub async fn delete(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        self.lifecycle.delete(branch_id).await
    }

    pub async fn repair_indexes(&self) -> Result<RepairReport> {
        self.manager.repair_agent().repair().await
    }

    pub async fn inspect_indexes(&self) -> Result<Vec<ClassifiedIndex>> {
        self.manager
            .repair_agent()
            .inspector()
            .inspect_classified()
            .await
            .map_err(InvariantError::from)
    }

    pub async fn reconcile_group(&self, group_id: &GroupId) -> Result<ReconcileSummary> {
        let _guard = self.locks.lock(group_id).await;
        self.reconciler.reconcile_group(group_id).await
    }

    /// Reconcile every group, one lock at a time.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileSummary>> {
        let mut summaries = Vec::new();
        for group_id in self.store.group_ids().await? {
            summaries.push(self.reconcile_group(&group_id).await?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgdesk_branch_store::MemoryBranchStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = Arc::new(MemoryBranchStore::new());
        let config = InvariantConfig {
            max_name_len: 0,
            ..Default::default()
        };
        assert!(matches!(
            BranchInvariants::new(store, config),
            Err(InvariantError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_transfers_in_one_group_stay_consistent() {
        let store = Arc::new(MemoryBranchStore::new());
        let service = Arc::new(BranchInvariants::new(store.clone(), InvariantConfig::default()).unwrap());
        let group = GroupId::from("pg-busy");

        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            ids.push(service.create(&group, NewBranch::new(name)).await.unwrap().id);
        }

        let mut tasks = Vec::new();
        for round in 0..20 {
            let service = service.clone();
            let id = ids[round % ids.len()];
            tasks.push(tokio::spawn(async move { service.set_default(&id).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let active = service.list(&group, false).await.unwrap();
        assert_eq!(active.iter().filter(|r| r.is_default).count(), 1);
        let summary = service.reconcile_group(&group).await.unwrap();
        assert!(summary.is_clean());
    }

    #[tokio::test]
    async fn test_list_with_inactive() {
        let store = Arc::new(MemoryBranchStore::new());
        let service = BranchInvariants::new(store, InvariantConfig::default()).unwrap();
        let group = GroupId::from("pg-list");

        service.create(&group, NewBranch::new("Main")).await.unwrap();
        let annex = service.create(&group, NewBranch::new("Annex")).await.unwrap();
        service.deactivate(&annex.id).await.unwrap();

        assert_eq!(service.list(&group, false).await.unwrap().len(), 1);
        assert_eq!(service.list(&group, true).await.unwrap().len(), 2);
    }
}
