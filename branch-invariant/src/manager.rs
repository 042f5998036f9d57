use crate::config::InvariantConfig;
use crate::error::InvariantError;
use crate::error::Result;
use crate::inspector::unsafe_default_conflict;
use crate::repair::IndexRepairAgent;
use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::BranchRecord;
use pgdesk_branch_store::BranchStore;
use pgdesk_branch_store::GroupId;
use pgdesk_branch_store::StoreError;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Step of the default transfer that a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Reset,
    Set,
    Verify,
}

/// Why a single transfer attempt stopped.
enum AttemptFailure {
    /// The legacy unique index rejected a write; repairable.
    Conflict { index: String, source: StoreError },
    Fatal(InvariantError),
}

impl AttemptFailure {
    fn from_write(phase: TransitionPhase, err: StoreError) -> Self {
        match unsafe_default_conflict(&err).map(str::to_string) {
            Some(index) => {
                warn!(?phase, %index, "default transfer hit unsafe unique index");
                AttemptFailure::Conflict { index, source: err }
            }
            None => AttemptFailure::Fatal(InvariantError::Store(err)),
        }
    }
}

/// Moves the default marker of a property group from branch to branch.
///
/// The transfer is two single-document-atomic writes followed by a
/// verification read; it is not atomic as a unit. Callers must serialize
/// `set_default` per group (see [`crate::GroupLocks`]) before calling in.
/// The manager itself takes no locks.
pub struct DefaultInvariantManager {
    store: Arc<dyn BranchStore>,
    repair_agent: IndexRepairAgent,
    config: InvariantConfig,
}

impl DefaultInvariantManager {
    pub fn new(
        store: Arc<dyn BranchStore>,
        repair_agent: IndexRepairAgent,
        config: InvariantConfig,
    ) -> Self {
        Self {
            store,
            repair_agent,
            config,
        }
    }

    pub fn repair_agent(&self) -> &IndexRepairAgent {
        &self.repair_agent
    }

    pub fn config(&self) -> &InvariantConfig {
        &self.config
    }

    /// Make `branch_id` the only default of its group and return the verified
    /// record.
    ///
    /// Precondition: no other `set_default` for the same group is in flight.
    #[tracing::instrument(skip(self), fields(group_id = tracing::field::Empty))]
    pub async fn set_default(&self, branch_id: &BranchId) -> Result<BranchRecord> {
        let target = self
            .store
            .get(branch_id)
            .await?
            .ok_or(InvariantError::NotFound(*branch_id))?;
        tracing::Span::current().record("group_id", target.group_id.as_str());

        if !target.is_active {
            return Err(InvariantError::InactiveTarget(*branch_id));
        }
        if target.is_default && self.is_sole_default(&target).await? {
            debug!("branch already sole default; nothing to do");
            return Ok(target);
        }

        let (index, source) = match self.attempt(&target).await {
            Ok(record) => return Ok(record),
            Err(AttemptFailure::Fatal(err)) => return Err(err),
            Err(AttemptFailure::Conflict { index, source }) => (index, source),
        };

        if !self.config.repair_on_conflict {
            return Err(InvariantError::ConstraintRepairFailed {
                group_id: target.group_id.clone(),
                index,
                source,
            });
        }

        if let Err(err) = self.repair_agent.repair().await {
            warn!(%index, error = %err, "index repair failed during default transfer");
            let source = match err {
                InvariantError::RepairFailed { source } => source,
                other => StoreError::Other(other.to_string()),
            };
            return Err(InvariantError::ConstraintRepairFailed {
                group_id: target.group_id.clone(),
                index,
                source,
            });
        }

        info!(%index, "retrying default transfer after index repair");
        match self.attempt(&target).await {
            Ok(record) => Ok(record),
            Err(AttemptFailure::Fatal(err)) => Err(err),
            Err(AttemptFailure::Conflict { index, source }) => {
                Err(InvariantError::ConstraintRepairFailed {
                    group_id: target.group_id.clone(),
                    index,
                    source,
                })
            }
        }
    }

    async fn is_sole_default(&self, target: &BranchRecord) -> Result<bool> {
        let active = self.store.list_active(&target.group_id).await?;
        Ok(active
            .iter()
            .filter(|record| record.is_default)
            .all(|record| record.id == target.id))
    }

    /// One pass of reset, set, verify.
    async fn attempt(&self, target: &BranchRecord) -> std::result::Result<BranchRecord, AttemptFailure> {
        let group_id = &target.group_id;

        let cleared = self
            .store
            .update_many_default_flag(group_id, Some(&target.id), false)
            .await
            .map_err(|err| AttemptFailure::from_write(TransitionPhase::Reset, err))?;
        debug!(cleared, "reset sibling default flags");

        let updated = self
            .store
            .set_default_flag(&target.id, true)
            .await
            .map_err(|err| AttemptFailure::from_write(TransitionPhase::Set, err))?;
        if updated.is_none() {
            // Vanished between the lookup and the write.
            return Err(AttemptFailure::Fatal(InvariantError::NotFound(target.id)));
        }

        self.verify(group_id, &target.id)
            .await
            .map_err(AttemptFailure::Fatal)
    }

    async fn verify(&self, group_id: &GroupId, expected: &BranchId) -> Result<BranchRecord> {
        let active = self.store.list_active(group_id).await?;
        let holders: Vec<&BranchRecord> = active.iter().filter(|record| record.is_default).collect();

        match holders.as_slice() {
            [only] if &only.id == expected => {
                info!(branch_id = %expected, "default transferred");
                Ok((*only).clone())
            }
            _ => {
                warn!(
                    phase = ?TransitionPhase::Verify,
                    found = holders.len(),
                    "default invariant violated after transfer"
                );
                Err(InvariantError::InvariantViolation {
                    group_id: group_id.clone(),
                    expected: *expected,
                    found: holders.len(),
                    holders: holders.iter().map(|record| record.id).collect(),
                })
            }
        }
    }

    /// The current default of a group, `None` when the group has no active
    /// default. More than one active default is reported as a violation.
    pub async fn default_for(&self, group_id: &GroupId) -> Result<Option<BranchRecord>> {
        let active = self.store.list_active(group_id).await?;
        let mut holders: Vec<BranchRecord> =
            active.into_iter().filter(|record| record.is_default).collect();

        match holders.len() {
            0 => Ok(None),
            1 => Ok(holders.pop()),
            found => Err(InvariantError::InvariantViolation {
                group_id: group_id.clone(),
                expected: holders[0].id,
                found,
                holders: holders.iter().map(|record| record.id).collect(),
            }),
        }
    }
}
