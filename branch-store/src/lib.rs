//! # pgdesk branch store
//!
//! Typed access to the branch collection of the property back office: branch
//! documents, their index metadata, and an in-process collection that behaves
//! like the production document store (unique indexes, per-document atomic
//! writes, non-atomic bulk updates).
//!
//! The store carries no invariant logic. Keeping exactly one default branch per
//! property group is the job of `pgdesk-branch-invariant`.
//!
//! ## Example
//!
//! ```no_run
//! use pgdesk_branch_store::{BranchRecord, BranchStore, GroupId, MemoryBranchStore};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryBranchStore::open(Path::new("branches.json")).await?;
//!     let group = GroupId::from("pg-42");
//!
//!     store.insert(BranchRecord::new(group.clone(), "Main", true)).await?;
//!     let active = store.list_active(&group).await?;
//!
//!     println!("{} active branches", active.len());
//!     Ok(())
//! }
//! ```

mod error;
mod index;
mod memory;
mod record;
mod store;

pub use error::{Result, StoreError};
pub use index::{ID_INDEX_NAME, IndexDescriptor, IndexKey, KeyOrder, default_index_name};
pub use memory::MemoryBranchStore;
pub use record::{
    BranchId, BranchRecord, FIELD_CREATED_AT, FIELD_GROUP_ID, FIELD_ID, FIELD_IS_ACTIVE,
    FIELD_IS_DEFAULT, FIELD_NAME, FIELD_UPDATED_AT, FlagPatch, GroupId, normalize_name,
};
pub use store::{BranchStore, IndexCatalog, IndexCreation};
