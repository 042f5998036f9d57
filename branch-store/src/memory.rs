// In-process document collection for branch records.
// Enforces unique indexes the way a document database does and can persist
// itself as a JSON snapshot so maintenance tooling can operate on a file.

use crate::error::Result;
use crate::error::StoreError;
use crate::index::IndexDescriptor;
use crate::record::BranchId;
use crate::record::BranchRecord;
use crate::record::FlagPatch;
use crate::record::GroupId;
use crate::store::BranchStore;
use crate::store::IndexCatalog;
use crate::store::IndexCreation;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<BranchRecord>,
    indexes: Vec<IndexDescriptor>,
}

#[derive(Debug)]
struct Collection {
    records: HashMap<BranchId, BranchRecord>,
    indexes: Vec<IndexDescriptor>,
}

impl Default for Collection {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            indexes: vec![IndexDescriptor::primary()],
        }
    }
}

impl Collection {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        let mut collection = Collection {
            records: HashMap::with_capacity(snapshot.records.len()),
            indexes: snapshot.indexes,
        };
        if !collection.indexes.iter().any(IndexDescriptor::is_primary) {
            collection.indexes.insert(0, IndexDescriptor::primary());
        }
        for record in snapshot.records {
            if collection.records.insert(record.id, record).is_some() {
                return Err(StoreError::Corrupt(
                    "snapshot contains duplicate document ids".to_string(),
                ));
            }
        }
        Ok(collection)
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut records: Vec<BranchRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.group_id.cmp(&b.group_id).then_with(|| a.seniority(b)));
        Snapshot {
            version: SNAPSHOT_VERSION,
            records,
            indexes: self.indexes.clone(),
        }
    }

    fn group_records(&self, group_id: &GroupId, active_only: bool) -> Vec<BranchRecord> {
        let mut records: Vec<BranchRecord> = self
            .records
            .values()
            .filter(|record| &record.group_id == group_id)
            .filter(|record| !active_only || record.is_active)
            .cloned()
            .collect();
        records.sort_by(BranchRecord::seniority);
        records
    }

    /// Reject `candidate` if it collides with another document on any unique index.
    fn check_unique(&self, candidate: &BranchRecord, skip: Option<&BranchId>) -> Result<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = index_key(index, candidate);
            let collides = self
                .records
                .values()
                .filter(|other| Some(&other.id) != skip)
                .any(|other| index_key(index, other) == key);
            if collides {
                return Err(duplicate_key(index, &key));
            }
        }
        Ok(())
    }

    fn apply_patch(&mut self, id: &BranchId, patch: FlagPatch) -> Result<Option<BranchRecord>> {
        let Some(current) = self.records.get(id) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        patch.apply(&mut updated, Utc::now());
        self.check_unique(&updated, Some(id))?;
        self.records.insert(*id, updated.clone());
        Ok(Some(updated))
    }
}

fn index_key(index: &IndexDescriptor, record: &BranchRecord) -> Map<String, Value> {
    index
        .keys
        .iter()
        .map(|key| (key.field.clone(), record.field_value(&key.field)))
        .collect()
}

fn duplicate_key(index: &IndexDescriptor, key: &Map<String, Value>) -> StoreError {
    StoreError::DuplicateKey {
        index: index.name.clone(),
        key_fields: index.key_fields(),
        key: Value::Object(key.clone()).to_string(),
    }
}

/// Branch collection kept in memory, optionally mirrored to a JSON file.
pub struct MemoryBranchStore {
    path: Option<PathBuf>,
    collection: RwLock<Collection>,
    document_writes: AtomicU64,
}

impl Default for MemoryBranchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBranchStore {
    /// Empty, purely in-memory collection carrying only the `_id_` index.
    pub fn new() -> Self {
        Self {
            path: None,
            collection: RwLock::new(Collection::default()),
            document_writes: AtomicU64::new(0),
        }
    }

    /// Open the collection persisted at `path`, starting empty when the file
    /// does not exist yet. Every write is flushed back to the same file.
    pub async fn open(path: &Path) -> Result<Self> {
        let collection = if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read(path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&content)
                .map_err(|err| StoreError::Corrupt(format!("{}: {err}", path.display())))?;
            let collection = Collection::from_snapshot(snapshot)?;
            info!(
                path = %path.display(),
                records = collection.records.len(),
                indexes = collection.indexes.len(),
                "loaded branch collection"
            );
            collection
        } else {
            debug!(path = %path.display(), "no branch collection on disk, starting empty");
            Collection::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            collection: RwLock::new(collection),
            document_writes: AtomicU64::new(0),
        })
    }

    /// Number of document write operations issued against this handle.
    pub fn document_writes(&self) -> u64 {
        self.document_writes.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Count of documents, active or not.
    pub async fn len(&self) -> usize {
        self.collection.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.collection.read().await.records.is_empty()
    }

    fn count_write(&self) {
        self.document_writes.fetch_add(1, Ordering::SeqCst);
    }

    async fn persist(&self, collection: &Collection) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_vec_pretty(&collection.to_snapshot())?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Persist and then hand back the outcome of a write, so a partially
    /// applied bulk update is still flushed before its error surfaces.
    async fn finish<T>(&self, collection: &Collection, outcome: Result<T>) -> Result<T> {
        self.persist(collection).await?;
        outcome
    }
}

#[async_trait]
impl BranchStore for MemoryBranchStore {
    async fn get(&self, id: &BranchId) -> Result<Option<BranchRecord>> {
        Ok(self.collection.read().await.records.get(id).cloned())
    }

    async fn list_active(&self, group_id: &GroupId) -> Result<Vec<BranchRecord>> {
        Ok(self.collection.read().await.group_records(group_id, true))
    }

    async fn list_group(&self, group_id: &GroupId) -> Result<Vec<BranchRecord>> {
        Ok(self.collection.read().await.group_records(group_id, false))
    }

    async fn group_ids(&self) -> Result<Vec<GroupId>> {
        let collection = self.collection.read().await;
        let groups: BTreeSet<GroupId> = collection
            .records
            .values()
            .map(|record| record.group_id.clone())
            .collect();
        Ok(groups.into_iter().collect())
    }

    async fn insert(&self, record: BranchRecord) -> Result<BranchRecord> {
        self.count_write();
        let mut collection = self.collection.write().await;
        collection.check_unique(&record, None)?;
        collection.records.insert(record.id, record.clone());
        debug!(branch_id = %record.id, group_id = %record.group_id, "inserted branch");
        self.finish(&collection, Ok(record)).await
    }

    async fn update_many_default_flag(
        &self,
        group_id: &GroupId,
        except: Option<&BranchId>,
        value: bool,
    ) -> Result<u64> {
        self.count_write();
        let mut collection = self.collection.write().await;
        let targets: Vec<BranchId> = collection
            .group_records(group_id, true)
            .into_iter()
            .map(|record| record.id)
            .filter(|id| Some(id) != except)
            .collect();

        let mut matched = 0u64;
        let mut outcome = Ok(());
        for id in &targets {
            match collection.apply_patch(id, FlagPatch::default_flag(value)) {
                Ok(_) => matched += 1,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        debug!(%group_id, matched, value, "bulk default flag update");
        self.finish(&collection, outcome.map(|()| matched)).await
    }

    async fn update_flags(&self, id: &BranchId, patch: FlagPatch) -> Result<Option<BranchRecord>> {
        self.count_write();
        let mut collection = self.collection.write().await;
        let outcome = collection.apply_patch(id, patch);
        self.finish(&collection, outcome).await
    }
}

#[async_trait]
impl IndexCatalog for MemoryBranchStore {
    async fn list_indexes(&self) -> Result<Vec<IndexDescriptor>> {
        Ok(self.collection.read().await.indexes.clone())
    }

    async fn create_index(&self, index: IndexDescriptor) -> Result<IndexCreation> {
        let mut collection = self.collection.write().await;
        if let Some(existing) = collection
            .indexes
            .iter()
            .find(|existing| existing.name == index.name || existing.same_keys(&index))
        {
            if existing == &index {
                return Ok(IndexCreation::AlreadyExists);
            }
            return Err(StoreError::IndexConflict {
                name: index.name,
                existing: existing.name.clone(),
            });
        }

        if index.unique {
            let mut seen = Vec::with_capacity(collection.records.len());
            for record in collection.records.values() {
                let key = index_key(&index, record);
                if seen.contains(&key) {
                    return Err(duplicate_key(&index, &key));
                }
                seen.push(key);
            }
        }

        info!(index = %index.name, unique = index.unique, "created index");
        collection.indexes.push(index);
        self.finish(&collection, Ok(IndexCreation::Created)).await
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        let mut collection = self.collection.write().await;
        let Some(position) = collection.indexes.iter().position(|index| index.name == name) else {
            return Err(StoreError::IndexNotFound {
                name: name.to_string(),
            });
        };
        if collection.indexes[position].is_primary() {
            return Err(StoreError::InvalidIndexOperation {
                name: name.to_string(),
                reason: "cannot drop the primary key index".to_string(),
            });
        }
        collection.indexes.remove(position);
        info!(index = %name, "dropped index");
        self.finish(&collection, Ok(())).await
    }
}
