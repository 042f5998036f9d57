use crate::error::InvariantError;
use crate::error::Result;
use crate::inspector::unsafe_default_conflict;
use crate::lock::GroupGuard;
use crate::lock::GroupLocks;
use crate::manager::DefaultInvariantManager;
use async_trait::async_trait;
use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::BranchRecord;
use pgdesk_branch_store::BranchStore;
use pgdesk_branch_store::FlagPatch;
use pgdesk_branch_store::GroupId;
use pgdesk_branch_store::StoreError;
use pgdesk_branch_store::normalize_name;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Counts records owned by a branch (residents, rooms, tickets, ...) that
/// still block its removal. Ownership lives outside this crate.
#[async_trait]
pub trait DependentProbe: Send + Sync {
    async fn active_dependents(&self, branch: &BranchRecord) -> std::result::Result<u64, StoreError>;
}

/// Probe for deployments where branches own nothing that blocks removal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDependents;

#[async_trait]
impl DependentProbe for NoDependents {
    async fn active_dependents(&self, _branch: &BranchRecord) -> std::result::Result<u64, StoreError> {
        Ok(0)
    }
}

/// Caller-supplied fields for a new branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBranch {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl NewBranch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Create, activate, deactivate and soft-delete branches while keeping the
/// one-default-per-group invariant. Every operation holds the group lock.
pub struct BranchLifecycle {
    store: Arc<dyn BranchStore>,
    manager: Arc<DefaultInvariantManager>,
    locks: Arc<GroupLocks>,
    dependents: Arc<dyn DependentProbe>,
}

impl BranchLifecycle {
    pub fn new(
        store: Arc<dyn BranchStore>,
        manager: Arc<DefaultInvariantManager>,
        locks: Arc<GroupLocks>,
    ) -> Self {
        Self {
            store,
            manager,
            locks,
            dependents: Arc::new(NoDependents),
        }
    }

    pub fn with_dependent_probe(mut self, dependents: Arc<dyn DependentProbe>) -> Self {
        self.dependents = dependents;
        self
    }

    /// Create a branch. The first active branch of a group is created as its
    /// default; later ones are not.
    #[tracing::instrument(skip(self, new_branch), fields(name = %new_branch.name))]
    pub async fn create(&self, group_id: &GroupId, new_branch: NewBranch) -> Result<BranchRecord> {
        let name = self.validate(group_id, &new_branch)?;
        let _guard = self.locks.lock(group_id).await;

        let active = self.store.list_active(group_id).await?;
        ensure_name_free(group_id, &name, &active, None)?;

        let mut record = BranchRecord::new(group_id.clone(), name, active.is_empty());
        record.attributes = new_branch.attributes;

        let created = self
            .write_with_repair(|| self.store.insert(record.clone()))
            .await?;
        info!(branch_id = %created.id, is_default = created.is_default, "created branch");
        Ok(created)
    }

    /// Bring a soft-deleted branch back. It becomes the default only when the
    /// group has no active default.
    #[tracing::instrument(skip(self))]
    pub async fn activate(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        let (record, _guard) = self.lock_record(branch_id).await?;
        if record.is_active {
            return Ok(record);
        }

        let active = self.store.list_active(&record.group_id).await?;
        ensure_name_free(&record.group_id, &record.name, &active, Some(branch_id))?;
        let becomes_default = !active.iter().any(|sibling| sibling.is_default);

        let restored = self
            .write_with_repair(|| {
                self.store
                    .update_flags(branch_id, FlagPatch::restore(becomes_default))
            })
            .await?
            .ok_or(InvariantError::NotFound(*branch_id))?;
        info!(is_default = restored.is_default, "activated branch");
        Ok(restored)
    }

    /// Deactivate a branch that is not the group default.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        let (record, _guard) = self.lock_record(branch_id).await?;
        if !record.is_active {
            debug!("branch already inactive");
            return Ok(record);
        }
        if record.is_default {
            return Err(InvariantError::CannotDeactivateDefault(*branch_id));
        }
        self.ensure_no_dependents(&record).await?;
        self.retire(branch_id).await
    }

    /// Soft-delete a branch. A default hands its role to the oldest active
    /// sibling first; the last branch of a group leaves it with no default.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        let (record, _guard) = self.lock_record(branch_id).await?;
        if !record.is_active {
            debug!("branch already inactive");
            return Ok(record);
        }
        self.ensure_no_dependents(&record).await?;

        if record.is_default {
            let siblings = self.store.list_active(&record.group_id).await?;
            match siblings.iter().find(|sibling| sibling.id != record.id) {
                Some(heir) => {
                    info!(heir = %heir.id, "handing default to oldest sibling");
                    self.manager.set_default(&heir.id).await?;
                }
                None => {
                    info!("removing last active branch; group will have no default");
                }
            }
        }
        self.retire(branch_id).await
    }

    async fn retire(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        let retired = self
            .write_with_repair(|| self.store.update_flags(branch_id, FlagPatch::retire()))
            .await?
            .ok_or(InvariantError::NotFound(*branch_id))?;
        info!(branch_id = %retired.id, "deactivated branch");
        Ok(retired)
    }

    /// Look the record up, lock its group, and read it again under the lock.
    async fn lock_record(
        &self,
        branch_id: &BranchId,
    ) -> Result<(BranchRecord, GroupGuard)> {
        let record = self
            .store
            .get(branch_id)
            .await?
            .ok_or(InvariantError::NotFound(*branch_id))?;
        let guard = self.locks.lock(&record.group_id).await;
        let record = self
            .store
            .get(branch_id)
            .await?
            .ok_or(InvariantError::NotFound(*branch_id))?;
        Ok((record, guard))
    }

    async fn ensure_no_dependents(&self, record: &BranchRecord) -> Result<()> {
        let count = self.dependents.active_dependents(record).await?;
        if count > 0 {
            return Err(InvariantError::HasActiveChildren {
                branch_id: record.id,
                count,
            });
        }
        Ok(())
    }

    fn validate(&self, group_id: &GroupId, new_branch: &NewBranch) -> Result<String> {
        if group_id.as_str().trim().is_empty() {
            return Err(InvariantError::Validation("group id must not be empty".to_string()));
        }

        let name = new_branch.name.trim();
        if name.is_empty() {
            return Err(InvariantError::Validation("branch name must not be empty".to_string()));
        }

        let max = self.manager.config().max_name_len;
        if name.chars().count() > max {
            return Err(InvariantError::Validation(format!(
                "branch name exceeds {max} characters"
            )));
        }

        if name.chars().any(char::is_control) {
            return Err(InvariantError::Validation(
                "branch name contains control characters".to_string(),
            ));
        }

        Ok(name.to_string())
    }

    /// Run a single-document write; if the legacy unique default index rejects
    /// it, repair the indexes once and run it again.
    async fn write_with_repair<T, F, Fut>(&self, mut write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = pgdesk_branch_store::Result<T>>,
    {
        let err = match write().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let conflict = unsafe_default_conflict(&err).map(str::to_string);
        match conflict {
            Some(index) if self.manager.config().repair_on_conflict => {
                warn!(%index, "write hit unsafe unique index; repairing");
                self.manager.repair_agent().repair().await?;
                write().await.map_err(InvariantError::from)
            }
            _ => Err(err.into()),
        }
    }
}

fn ensure_name_free(
    group_id: &GroupId,
    name: &str,
    active: &[BranchRecord],
    except: Option<&BranchId>,
) -> Result<()> {
    let wanted = normalize_name(name);
    let taken = active
        .iter()
        .filter(|sibling| Some(&sibling.id) != except)
        .any(|sibling| sibling.normalized_name() == wanted);
    if taken {
        return Err(InvariantError::DuplicateName {
            group_id: group_id.clone(),
            name: name.to_string(),
        });
    }
    Ok(())
}
