use crate::error::Result;
use crate::index::IndexDescriptor;
use crate::record::BranchId;
use crate::record::BranchRecord;
use crate::record::FlagPatch;
use crate::record::GroupId;
use async_trait::async_trait;

/// Typed access to the branch documents.
///
/// Every write is atomic for the single document it touches and refreshes
/// `updatedAt`. Bulk writes are applied document by document and may stop
/// part-way; a failure is returned as the backend reported it so callers can
/// classify it. Implementations hold no invariant logic.
#[async_trait]
pub trait BranchStore: Send + Sync {
    /// Point lookup by id, active or not.
    async fn get(&self, id: &BranchId) -> Result<Option<BranchRecord>>;

    /// Active records of a group, oldest first.
    async fn list_active(&self, group_id: &GroupId) -> Result<Vec<BranchRecord>>;

    /// Every record of a group including soft-deleted ones, oldest first.
    async fn list_group(&self, group_id: &GroupId) -> Result<Vec<BranchRecord>>;

    /// Distinct group ids present in the collection.
    async fn group_ids(&self) -> Result<Vec<GroupId>>;

    async fn insert(&self, record: BranchRecord) -> Result<BranchRecord>;

    /// Set `isDefault = value` on every active record of the group except
    /// `except`. Returns the number of matched records.
    async fn update_many_default_flag(
        &self,
        group_id: &GroupId,
        except: Option<&BranchId>,
        value: bool,
    ) -> Result<u64>;

    /// Single-document flag update. `None` when no such document exists.
    async fn update_flags(&self, id: &BranchId, patch: FlagPatch) -> Result<Option<BranchRecord>>;

    async fn set_default_flag(&self, id: &BranchId, value: bool) -> Result<Option<BranchRecord>> {
        self.update_flags(id, FlagPatch::default_flag(value)).await
    }
}

/// Outcome of an index creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCreation {
    Created,
    /// An identical definition was already present; nothing changed.
    AlreadyExists,
}

/// Index metadata of the branch collection.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    async fn list_indexes(&self) -> Result<Vec<IndexDescriptor>>;

    /// Create an index. Unique indexes are rejected with a duplicate-key error
    /// when existing documents already collide.
    async fn create_index(&self, index: IndexDescriptor) -> Result<IndexCreation>;

    /// Drop an index by name; `IndexNotFound` when it does not exist.
    async fn drop_index(&self, name: &str) -> Result<()>;
}
