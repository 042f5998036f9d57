use crate::config::InvariantConfig;
use pgdesk_branch_store::FIELD_GROUP_ID;
use pgdesk_branch_store::FIELD_IS_ACTIVE;
use pgdesk_branch_store::FIELD_IS_DEFAULT;
use pgdesk_branch_store::IndexCatalog;
use pgdesk_branch_store::IndexDescriptor;
use pgdesk_branch_store::StoreError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Key shape that, when unique, forbids a second non-default branch per group.
pub const UNSAFE_DEFAULT_KEYS: [&str; 2] = [FIELD_GROUP_ID, FIELD_IS_DEFAULT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexClass {
    /// One of the indexes the invariant relies on.
    Safe,
    /// Unique `{groupId, isDefault}`: incompatible with normal operation.
    Unsafe,
    /// Unrelated to the default invariant.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedIndex {
    pub index: IndexDescriptor,
    pub class: IndexClass,
}

pub fn is_unsafe_default_index(index: &IndexDescriptor) -> bool {
    index.unique && index.covers_exactly(&UNSAFE_DEFAULT_KEYS)
}

/// If `err` is a duplicate-key rejection raised by an index with the unsafe
/// default shape, the name of that index.
pub fn unsafe_default_conflict(err: &StoreError) -> Option<&str> {
    match err {
        StoreError::DuplicateKey {
            index, key_fields, ..
        } => {
            let fields: BTreeSet<&str> = key_fields.iter().map(String::as_str).collect();
            let wanted: BTreeSet<&str> = UNSAFE_DEFAULT_KEYS.into_iter().collect();
            (key_fields.len() == wanted.len() && fields == wanted).then_some(index.as_str())
        }
        _ => None,
    }
}

/// The index set the invariant relies on, named per configuration.
pub fn safe_indexes(config: &InvariantConfig) -> Vec<IndexDescriptor> {
    vec![
        IndexDescriptor::ascending(&[FIELD_GROUP_ID, FIELD_IS_ACTIVE])
            .named(config.listing_index.clone()),
        IndexDescriptor::ascending(&[FIELD_GROUP_ID, FIELD_IS_DEFAULT, FIELD_IS_ACTIVE])
            .named(config.default_lookup_index.clone()),
    ]
}

/// Reads the branch collection's index definitions and classifies them.
pub struct ConstraintInspector {
    catalog: Arc<dyn IndexCatalog>,
    safe: Vec<IndexDescriptor>,
}

impl ConstraintInspector {
    pub fn new(catalog: Arc<dyn IndexCatalog>, config: &InvariantConfig) -> Self {
        Self {
            catalog,
            safe: safe_indexes(config),
        }
    }

    pub fn safe_indexes(&self) -> &[IndexDescriptor] {
        &self.safe
    }

    pub async fn inspect(&self) -> Result<Vec<IndexDescriptor>, StoreError> {
        self.catalog.list_indexes().await
    }

    pub fn classify(&self, index: &IndexDescriptor) -> IndexClass {
        if is_unsafe_default_index(index) {
            IndexClass::Unsafe
        } else if !index.unique && self.safe.iter().any(|safe| safe.same_keys(index)) {
            IndexClass::Safe
        } else {
            IndexClass::Other
        }
    }

    pub async fn inspect_classified(&self) -> Result<Vec<ClassifiedIndex>, StoreError> {
        let indexes = self.inspect().await?;
        Ok(indexes
            .into_iter()
            .map(|index| {
                let class = self.classify(&index);
                ClassifiedIndex { index, class }
            })
            .collect())
    }

    pub async fn find_unsafe_default_index(&self) -> Result<Option<IndexDescriptor>, StoreError> {
        let indexes = self.inspect().await?;
        Ok(indexes.into_iter().find(is_unsafe_default_index))
    }

    /// Required safe indexes with no equivalent in `existing`.
    pub fn missing_safe_indexes(&self, existing: &[IndexDescriptor]) -> Vec<IndexDescriptor> {
        self.safe
            .iter()
            .filter(|safe| {
                !existing
                    .iter()
                    .any(|index| !index.unique && index.same_keys(safe))
            })
            .cloned()
            .collect()
    }
}
