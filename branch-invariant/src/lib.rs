/*!
# Branch Invariants

Keeps exactly one default branch per property group on a document store that
cannot express the rule as a constraint.

## Components

- **ConstraintInspector**: classifies the collection's indexes; a unique
  `{groupId, isDefault}` index is *unsafe* because it rejects a second
  non-default branch.
- **IndexRepairAgent**: drops the unsafe index and ensures the safe
  `{groupId, isActive}` and `{groupId, isDefault, isActive}` indexes exist.
- **DefaultInvariantManager**: transfers the default (reset siblings, set
  target, verify), repairing and retrying once on schema drift.
- **DuplicateReconciler**: collapses duplicate names and duplicate defaults to
  the oldest branch.
- **BranchLifecycle**: create / activate / deactivate / soft-delete.
- **GroupLocks**: in-process per-group serialization for all of the above.

## Concurrency

A default transfer is two writes and is not atomic. Callers must serialize
transfers per group; [`BranchInvariants`] does this with [`GroupLocks`]. The
manager's verification step reports what slips through as
[`InvariantError::InvariantViolation`]; run the reconciler in response.

## Example

```rust,no_run
use pgdesk_branch_invariant::{BranchInvariants, InvariantConfig, NewBranch};
use pgdesk_branch_store::{GroupId, MemoryBranchStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = BranchInvariants::new(store, InvariantConfig::default())?;
    let group = GroupId::from("pg-42");

    let main = branches.create(&group, NewBranch::new("Main")).await?;
    let annex = branches.create(&group, NewBranch::new("Annex")).await?;
    assert!(main.is_default && !annex.is_default);

    branches.set_default(&annex.id).await?;
    let summary = branches.reconcile_group(&group).await?;
    assert!(summary.is_clean());

    Ok(())
}
```
*/

mod config;
mod error;
mod inspector;
mod lifecycle;
mod lock;
mod manager;
mod reconciler;
mod repair;
mod service;

pub use config::InvariantConfig;
pub use error::{InvariantError, Result};
pub use inspector::{
    ClassifiedIndex, ConstraintInspector, IndexClass, UNSAFE_DEFAULT_KEYS, is_unsafe_default_index,
    safe_indexes, unsafe_default_conflict,
};
pub use lifecycle::{BranchLifecycle, DependentProbe, NewBranch, NoDependents};
pub use lock::{GroupGuard, GroupLocks};
pub use manager::{DefaultInvariantManager, TransitionPhase};
pub use reconciler::{DuplicateReconciler, ReconcileSummary};
pub use repair::{IndexRepairAgent, RepairReport};
pub use service::BranchInvariants;
