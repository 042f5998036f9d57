use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;

/// Name of the primary-key index every collection carries.
pub const ID_INDEX_NAME: &str = "_id_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyOrder {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

impl KeyOrder {
    fn suffix(self) -> &'static str {
        match self {
            KeyOrder::Ascending => "1",
            KeyOrder::Descending => "-1",
        }
    }
}

/// One component of an index key shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    pub order: KeyOrder,
}

impl IndexKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: KeyOrder::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: KeyOrder::Descending,
        }
    }
}

/// A named index over the branch collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexDescriptor {
    /// Non-unique index named after its key shape (`groupId_1_isActive_1`).
    pub fn new(keys: Vec<IndexKey>) -> Self {
        let name = default_index_name(&keys);
        Self {
            name,
            keys,
            unique: false,
        }
    }

    /// Index over the given fields, all ascending.
    pub fn ascending(fields: &[&str]) -> Self {
        Self::new(fields.iter().map(|field| IndexKey::asc(*field)).collect())
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary() -> Self {
        Self::ascending(&[crate::record::FIELD_ID])
            .named(ID_INDEX_NAME)
            .unique()
    }

    pub fn is_primary(&self) -> bool {
        self.name == ID_INDEX_NAME
    }

    /// Field names in key order.
    pub fn key_fields(&self) -> Vec<String> {
        self.keys.iter().map(|key| key.field.clone()).collect()
    }

    /// Key fields as an unordered set.
    pub fn field_set(&self) -> BTreeSet<&str> {
        self.keys.iter().map(|key| key.field.as_str()).collect()
    }

    /// True when both indexes have the same ordered key shape.
    pub fn same_keys(&self, other: &IndexDescriptor) -> bool {
        self.keys == other.keys
    }

    /// True when the key shape covers exactly `fields`, in any order.
    pub fn covers_exactly(&self, fields: &[&str]) -> bool {
        let wanted: BTreeSet<&str> = fields.iter().copied().collect();
        self.keys.len() == wanted.len() && self.field_set() == wanted
    }
}

pub fn default_index_name(keys: &[IndexKey]) -> String {
    keys.iter()
        .map(|key| format!("{}_{}", key.field, key.order.suffix()))
        .collect::<Vec<_>>()
        .join("_")
}
