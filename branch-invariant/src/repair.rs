use crate::config::InvariantConfig;
use crate::error::InvariantError;
use crate::error::Result;
use crate::inspector::ConstraintInspector;
use crate::inspector::is_unsafe_default_index;
use pgdesk_branch_store::IndexCatalog;
use pgdesk_branch_store::IndexCreation;
use pgdesk_branch_store::IndexDescriptor;
use pgdesk_branch_store::StoreError;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// What a repair pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Unsafe indexes removed by this pass
    pub dropped: Vec<String>,
    /// Safe indexes created by this pass
    pub created: Vec<String>,
    /// Safe indexes that were already in place
    pub present: Vec<String>,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        !self.dropped.is_empty() || !self.created.is_empty()
    }
}

/// Drops the legacy `{groupId, isDefault}` unique index and ensures the safe
/// index set exists. Running it again is a no-op apart from re-checking the
/// safe indexes.
pub struct IndexRepairAgent {
    catalog: Arc<dyn IndexCatalog>,
    inspector: ConstraintInspector,
}

impl IndexRepairAgent {
    pub fn new(catalog: Arc<dyn IndexCatalog>, config: &InvariantConfig) -> Self {
        let inspector = ConstraintInspector::new(catalog.clone(), config);
        Self { catalog, inspector }
    }

    pub fn inspector(&self) -> &ConstraintInspector {
        &self.inspector
    }

    #[tracing::instrument(skip(self))]
    pub async fn repair(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let existing = self
            .inspector
            .inspect()
            .await
            .map_err(InvariantError::repair_failed)?;

        for index in existing.iter().filter(|index| is_unsafe_default_index(index)) {
            match self.catalog.drop_index(&index.name).await {
                Ok(()) => {
                    warn!(index = %index.name, "dropped unsafe unique default index");
                    report.dropped.push(index.name.clone());
                }
                Err(StoreError::IndexNotFound { name }) => {
                    debug!(index = %name, "unsafe index already gone");
                }
                Err(err) => return Err(InvariantError::repair_failed(err)),
            }
        }

        for safe in self.inspector.safe_indexes() {
            if let Some(equivalent) = existing
                .iter()
                .find(|index| !index.unique && index.same_keys(safe))
            {
                report.present.push(equivalent.name.clone());
                continue;
            }
            self.ensure(safe.clone(), &mut report).await?;
        }

        if report.changed() {
            info!(
                dropped = report.dropped.len(),
                created = report.created.len(),
                "repaired branch indexes"
            );
        } else {
            debug!("branch indexes already consistent");
        }
        Ok(report)
    }

    async fn ensure(&self, index: IndexDescriptor, report: &mut RepairReport) -> Result<()> {
        let name = index.name.clone();
        match self.catalog.create_index(index).await {
            Ok(IndexCreation::Created) => report.created.push(name),
            Ok(IndexCreation::AlreadyExists) => report.present.push(name),
            Err(err) => return Err(InvariantError::repair_failed(err)),
        }
        Ok(())
    }
}
