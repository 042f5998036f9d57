use crate::error::Result;
use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::BranchRecord;
use pgdesk_branch_store::BranchStore;
use pgdesk_branch_store::FlagPatch;
use pgdesk_branch_store::GroupId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Records altered by each reconciliation pass over one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub group_id: GroupId,
    /// Duplicate-name records retired (deactivated and stripped of the default flag)
    pub names_collapsed: usize,
    /// Surplus defaults cleared
    pub defaults_collapsed: usize,
    /// Set to 1 when a group left without any default got its oldest branch promoted
    pub defaults_restored: usize,
}

impl ReconcileSummary {
    fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            names_collapsed: 0,
            defaults_collapsed: 0,
            defaults_restored: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.names_collapsed + self.defaults_collapsed + self.defaults_restored
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

/// Collapses duplicate names and duplicate defaults in a group to one
/// canonical survivor, the branch with the earliest `createdAt`.
///
/// Every pass is idempotent and a clean group sees no writes. Like the
/// manager, the reconciler expects callers to serialize work per group.
pub struct DuplicateReconciler {
    store: Arc<dyn BranchStore>,
}

impl DuplicateReconciler {
    pub fn new(store: Arc<dyn BranchStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile_group(&self, group_id: &GroupId) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::new(group_id.clone());

        // list_active is oldest first, so the head of every bucket is canonical.
        let active = self.store.list_active(group_id).await?;

        let retired = self.collapse_names(&active, &mut summary).await?;
        let remaining: Vec<&BranchRecord> = active
            .iter()
            .filter(|record| !retired.contains(&record.id))
            .collect();

        let survivor = self.collapse_defaults(&remaining, &mut summary).await?;
        if survivor.is_none() {
            if let Some(oldest) = remaining.first() {
                if self.store.set_default_flag(&oldest.id, true).await?.is_some() {
                    warn!(branch_id = %oldest.id, "group had no default; promoted oldest branch");
                    summary.defaults_restored = 1;
                }
            }
        }

        if summary.is_clean() {
            debug!("group already consistent");
        } else {
            info!(
                names_collapsed = summary.names_collapsed,
                defaults_collapsed = summary.defaults_collapsed,
                defaults_restored = summary.defaults_restored,
                "reconciled branch group"
            );
        }
        Ok(summary)
    }

    /// Reconcile every group present in the collection.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileSummary>> {
        let mut summaries = Vec::new();
        for group_id in self.store.group_ids().await? {
            summaries.push(self.reconcile_group(&group_id).await?);
        }
        Ok(summaries)
    }

    async fn collapse_names(
        &self,
        active: &[BranchRecord],
        summary: &mut ReconcileSummary,
    ) -> Result<HashSet<BranchId>> {
        let mut by_name: BTreeMap<String, Vec<&BranchRecord>> = BTreeMap::new();
        for record in active {
            by_name
                .entry(record.normalized_name())
                .or_default()
                .push(record);
        }

        let mut retired = HashSet::new();
        for (name, records) in by_name {
            let Some((canonical, duplicates)) = records.split_first() else {
                continue;
            };
            for duplicate in duplicates {
                if self
                    .store
                    .update_flags(&duplicate.id, FlagPatch::retire())
                    .await?
                    .is_some()
                {
                    debug!(%name, kept = %canonical.id, retired = %duplicate.id, "collapsed duplicate name");
                    summary.names_collapsed += 1;
                }
                retired.insert(duplicate.id);
            }
        }
        Ok(retired)
    }

    /// Keep only the oldest default among `remaining`; returns it.
    async fn collapse_defaults(
        &self,
        remaining: &[&BranchRecord],
        summary: &mut ReconcileSummary,
    ) -> Result<Option<BranchId>> {
        let mut defaults = remaining.iter().filter(|record| record.is_default);
        let Some(canonical) = defaults.next() else {
            return Ok(None);
        };
        for extra in defaults {
            if self
                .store
                .set_default_flag(&extra.id, false)
                .await?
                .is_some()
            {
                debug!(kept = %canonical.id, cleared = %extra.id, "collapsed duplicate default");
                summary.defaults_collapsed += 1;
            }
        }
        Ok(Some(canonical.id))
    }
}
