use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use chrono::TimeZone;
use chrono::Utc;
use pgdesk_branch_invariant::BranchInvariants;
use pgdesk_branch_invariant::InvariantConfig;
use pgdesk_branch_invariant::InvariantError;
use pgdesk_branch_invariant::NewBranch;
use pgdesk_branch_invariant::ReconcileSummary;
use pgdesk_branch_invariant::is_unsafe_default_index;
use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::BranchRecord;
use pgdesk_branch_store::BranchStore;
use pgdesk_branch_store::GroupId;
use pgdesk_branch_store::IndexCatalog;
use pgdesk_branch_store::IndexDescriptor;
use pgdesk_branch_store::MemoryBranchStore;
use pretty_assertions::assert_eq;

fn service(store: &Arc<MemoryBranchStore>) -> Result<BranchInvariants> {
    Ok(BranchInvariants::new(store.clone(), InvariantConfig::default())?)
}

/// Inserts records directly, bypassing the lifecycle checks, with creation
/// times one minute apart in slice order.
async fn seed(
    store: &MemoryBranchStore,
    group: &GroupId,
    rows: &[(&str, bool)],
) -> Result<Vec<BranchRecord>> {
    let base = Utc
        .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("bad base time"))?;
    let mut records = Vec::new();
    for (offset, (name, is_default)) in rows.iter().enumerate() {
        let created = base + Duration::minutes(offset as i64);
        let record = BranchRecord::with_created_at(group.clone(), *name, *is_default, created);
        records.push(store.insert(record).await?);
    }
    Ok(records)
}

async fn active_defaults(store: &MemoryBranchStore, group: &GroupId) -> Result<Vec<BranchId>> {
    Ok(store
        .list_active(group)
        .await?
        .into_iter()
        .filter(|record| record.is_default)
        .map(|record| record.id)
        .collect())
}

#[tokio::test]
async fn set_default_leaves_nothing_to_reconcile() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let group = GroupId::from("pg-100");
    let records = seed(&store, &group, &[("Main", true), ("Annex", false), ("Wing", false)]).await?;

    for record in records.iter().rev() {
        branches.set_default(&record.id).await?;
        let summary = branches.reconcile_group(&group).await?;
        assert_eq!(summary.defaults_collapsed, 0);
        assert!(summary.is_clean());
    }
    Ok(())
}

#[tokio::test]
async fn set_default_on_one_of_two_defaults_keeps_the_chosen_one() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let group = GroupId::from("pg-108");
    let records = seed(&store, &group, &[("Main", true), ("Annex", true)]).await?;

    let chosen = branches.set_default(&records[1].id).await?;
    assert!(chosen.is_default);
    assert_eq!(active_defaults(&store, &group).await?, vec![records[1].id]);

    let summary = branches.reconcile_group(&group).await?;
    assert!(summary.is_clean());
    assert_eq!(active_defaults(&store, &group).await?, vec![records[1].id]);
    Ok(())
}

#[tokio::test]
async fn repeated_set_default_performs_no_writes() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let group = GroupId::from("pg-101");
    let records = seed(&store, &group, &[("Main", true), ("Annex", false)]).await?;

    let first = branches.set_default(&records[1].id).await?;
    let writes = store.document_writes();
    let second = branches.set_default(&records[1].id).await?;

    assert_eq!(store.document_writes(), writes);
    assert_eq!(second, first);
    Ok(())
}

#[tokio::test]
async fn first_created_branch_is_default_until_transferred() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let group = GroupId::from("pg-102");

    let b1 = branches.create(&group, NewBranch::new("B1")).await?;
    let b2 = branches.create(&group, NewBranch::new("B2")).await?;
    let b3 = branches.create(&group, NewBranch::new("B3")).await?;
    assert_eq!(active_defaults(&store, &group).await?, vec![b1.id]);
    assert!(!b2.is_default);

    let promoted = branches.set_default(&b3.id).await?;
    assert!(promoted.is_default);
    assert_eq!(active_defaults(&store, &group).await?, vec![b3.id]);
    Ok(())
}

#[tokio::test]
async fn set_default_repairs_unsafe_index_in_place() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let group = GroupId::from("pg-103");
    let records = seed(&store, &group, &[("Main", true), ("Annex", false)]).await?;
    store
        .create_index(IndexDescriptor::ascending(&["groupId", "isDefault"]).unique())
        .await?;
    let branches = service(&store)?;

    let promoted = branches.set_default(&records[1].id).await?;
    assert!(promoted.is_default);
    assert_eq!(active_defaults(&store, &group).await?, vec![records[1].id]);

    let indexes = store.list_indexes().await?;
    assert!(!indexes.iter().any(is_unsafe_default_index));
    let names: Vec<&str> = indexes.iter().map(|index| index.name.as_str()).collect();
    assert!(names.contains(&"groupId_1_isActive_1"));
    assert!(names.contains(&"groupId_1_isDefault_1_isActive_1"));
    Ok(())
}

#[tokio::test]
async fn conflict_without_repair_is_reported() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let group = GroupId::from("pg-104");
    let records = seed(&store, &group, &[("Main", true), ("Annex", false)]).await?;
    store
        .create_index(IndexDescriptor::ascending(&["groupId", "isDefault"]).unique())
        .await?;
    let config = InvariantConfig {
        repair_on_conflict: false,
        ..Default::default()
    };
    let branches = BranchInvariants::new(store.clone(), config)?;

    let err = branches.set_default(&records[1].id).await.unwrap_err();
    match err {
        InvariantError::ConstraintRepairFailed { index, .. } => {
            assert_eq!(index, "groupId_1_isDefault_1");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn duplicate_defaults_by_name_collapse_to_earliest() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let group = GroupId::from("pg-105");
    let records = seed(&store, &group, &[("Main", true), (" main ", true), ("Annex", false)]).await?;

    let summary = branches.reconcile_group(&group).await?;
    assert_eq!(summary.names_collapsed, 1);

    let active = store.list_active(&group).await?;
    let mains: Vec<&BranchRecord> = active
        .iter()
        .filter(|record| record.normalized_name() == "main")
        .collect();
    assert_eq!(mains.len(), 1);
    assert_eq!(mains[0].id, records[0].id);
    assert!(mains[0].is_default);
    assert_eq!(active_defaults(&store, &group).await?, vec![records[0].id]);

    let again = branches.reconcile_group(&group).await?;
    assert!(again.is_clean());
    Ok(())
}

#[tokio::test]
async fn default_cannot_be_deactivated_but_can_be_deleted() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let group = GroupId::from("pg-106");
    let records = seed(&store, &group, &[("Main", true), ("Annex", false), ("Wing", false)]).await?;

    let err = branches.deactivate(&records[0].id).await.unwrap_err();
    assert!(matches!(err, InvariantError::CannotDeactivateDefault(id) if id == records[0].id));

    branches.delete(&records[0].id).await?;
    assert_eq!(active_defaults(&store, &group).await?, vec![records[1].id]);

    branches.delete(&records[2].id).await?;
    branches.delete(&records[1].id).await?;
    assert!(active_defaults(&store, &group).await?.is_empty());
    assert!(store.list_active(&group).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn repair_indexes_converges() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    store
        .create_index(IndexDescriptor::ascending(&["groupId", "isDefault"]).unique())
        .await?;
    let branches = service(&store)?;

    let first = branches.repair_indexes().await?;
    assert!(first.changed());
    let after_first = store.list_indexes().await?;

    let second = branches.repair_indexes().await?;
    assert!(!second.changed());
    assert_eq!(store.list_indexes().await?, after_first);
    Ok(())
}

#[tokio::test]
async fn reconcile_all_sweeps_every_group() -> Result<()> {
    let store = Arc::new(MemoryBranchStore::new());
    let branches = service(&store)?;
    let north = GroupId::from("pg-north");
    let south = GroupId::from("pg-south");
    seed(&store, &north, &[("Main", true), ("Annex", true)]).await?;
    seed(&store, &south, &[("Main", false), ("Annex", false)]).await?;

    let summaries = branches.reconcile_all().await?;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries.iter().map(ReconcileSummary::total).sum::<usize>(), 2);

    for group in [&north, &south] {
        assert_eq!(active_defaults(&store, group).await?.len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn snapshot_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("branches.json");
    let group = GroupId::from("pg-107");

    let annex_id = {
        let store = Arc::new(MemoryBranchStore::open(&path).await?);
        let branches = service(&store)?;
        branches.create(&group, NewBranch::new("Main")).await?;
        let annex = branches.create(&group, NewBranch::new("Annex")).await?;
        branches.set_default(&annex.id).await?;
        annex.id
    };

    let store = MemoryBranchStore::open(&path).await?;
    assert_eq!(active_defaults(&store, &group).await?, vec![annex_id]);
    Ok(())
}
