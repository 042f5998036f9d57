use pgdesk_branch_store::BranchId;
use pgdesk_branch_store::GroupId;
use pgdesk_branch_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InvariantError {
    #[error("branch {0} not found")]
    NotFound(BranchId),

    #[error("branch {0} is inactive and cannot become the default")]
    InactiveTarget(BranchId),

    /// The unsafe unique index still blocked the transition after one repair
    /// and retry. Needs an operator.
    #[error("index `{index}` still blocks the default transfer in group {group_id} after repair: {source}")]
    ConstraintRepairFailed {
        group_id: GroupId,
        index: String,
        #[source]
        source: StoreError,
    },

    /// Writes succeeded but the group does not hold exactly one default, the
    /// expected one. Run the reconciler instead of retrying.
    #[error("group {group_id} expected {expected} as its only default, found {found} default(s)")]
    InvariantViolation {
        group_id: GroupId,
        expected: BranchId,
        found: usize,
        holders: Vec<BranchId>,
    },

    #[error("index repair failed: {source}")]
    RepairFailed {
        #[source]
        source: StoreError,
    },

    #[error("invalid branch: {0}")]
    Validation(String),

    #[error("group {group_id} already has an active branch named {name:?}")]
    DuplicateName { group_id: GroupId, name: String },

    #[error("branch {0} is the group default; choose another default first")]
    CannotDeactivateDefault(BranchId),

    #[error("branch {branch_id} still owns {count} active dependent record(s)")]
    HasActiveChildren { branch_id: BranchId, count: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<toml::de::Error> for InvariantError {
    fn from(err: toml::de::Error) -> Self {
        InvariantError::Config(err.to_string())
    }
}

impl InvariantError {
    pub(crate) fn repair_failed(source: StoreError) -> Self {
        Self::RepairFailed { source }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            InvariantError::NotFound(_)
                | InvariantError::InactiveTarget(_)
                | InvariantError::Validation(_)
                | InvariantError::DuplicateName { .. }
                | InvariantError::CannotDeactivateDefault(_)
                | InvariantError::HasActiveChildren { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, InvariantError>;
