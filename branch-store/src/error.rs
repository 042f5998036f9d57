use thiserror::Error;

/// Errors raised by the branch collection.
///
/// Callers classify these structurally: a `DuplicateKey` names the index that
/// rejected the write together with that index's key fields.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write would give two documents the same key in a unique index
    #[error("duplicate key error on index `{index}` ({fields}): {key}", fields = .key_fields.join(", "))]
    DuplicateKey {
        index: String,
        key_fields: Vec<String>,
        key: String,
    },

    /// The named index does not exist
    #[error("index not found: {name}")]
    IndexNotFound { name: String },

    /// An index with the same name or key shape but a different definition exists
    #[error("index `{name}` conflicts with existing index `{existing}`")]
    IndexConflict { name: String, existing: String },

    /// The operation is not allowed on this index
    #[error("invalid index operation on `{name}`: {reason}")]
    InvalidIndexOperation { name: String, reason: String },

    /// The snapshot on disk could not be used
    #[error("corrupt collection snapshot: {0}")]
    Corrupt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }

    pub fn is_index_not_found(&self) -> bool {
        matches!(self, StoreError::IndexNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
