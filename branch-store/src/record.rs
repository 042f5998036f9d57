use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Document field names as they appear in the collection and in index key shapes.
pub const FIELD_ID: &str = "_id";
pub const FIELD_GROUP_ID: &str = "groupId";
pub const FIELD_NAME: &str = "name";
pub const FIELD_IS_DEFAULT: &str = "isDefault";
pub const FIELD_IS_ACTIVE: &str = "isActive";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// Identifier of a single branch document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(Uuid);

impl BranchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BranchId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for BranchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the property group (tenant) that owns a set of branches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GroupId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A branch document as stored in the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    #[serde(rename = "_id")]
    pub id: BranchId,

    /// Owning property group; every invariant is scoped to this value.
    pub group_id: GroupId,

    /// Display name, unique among the active branches of a group
    pub name: String,

    pub is_default: bool,

    /// Soft-delete flag. Inactive branches are invisible to the invariants.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Free-form descriptive fields (address, phone, ...) owned by the calling layer
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl BranchRecord {
    /// Build a fresh active record stamped with the current time.
    pub fn new(group_id: GroupId, name: impl Into<String>, is_default: bool) -> Self {
        Self::with_created_at(group_id, name, is_default, Utc::now())
    }

    /// Build an active record with an explicit creation time.
    pub fn with_created_at(
        group_id: GroupId,
        name: impl Into<String>,
        is_default: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BranchId::new(),
            group_id,
            name: name.into(),
            is_default,
            is_active: true,
            created_at,
            updated_at: created_at,
            attributes: BTreeMap::new(),
        }
    }

    /// Name used for uniqueness comparisons: trimmed and lowercased.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// True when this record currently counts as the group default.
    pub fn is_active_default(&self) -> bool {
        self.is_active && self.is_default
    }

    /// Value of a top-level document field, as an index would see it.
    /// Unknown fields read as `null`, matching how a document store indexes
    /// missing keys.
    pub fn field_value(&self, field: &str) -> Value {
        match field {
            FIELD_ID => Value::String(self.id.to_string()),
            FIELD_GROUP_ID => Value::String(self.group_id.to_string()),
            FIELD_NAME => Value::String(self.name.clone()),
            FIELD_IS_DEFAULT => Value::Bool(self.is_default),
            FIELD_IS_ACTIVE => Value::Bool(self.is_active),
            FIELD_CREATED_AT => Value::String(self.created_at.to_rfc3339()),
            FIELD_UPDATED_AT => Value::String(self.updated_at.to_rfc3339()),
            _ => Value::Null,
        }
    }

    /// Seniority order: ascending `(created_at, id)`.
    pub fn seniority(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Single-document update of the invariant flags. `None` leaves a flag as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagPatch {
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

impl FlagPatch {
    pub fn default_flag(value: bool) -> Self {
        Self {
            is_default: Some(value),
            is_active: None,
        }
    }

    /// Soft-delete: inactive and never default.
    pub fn retire() -> Self {
        Self {
            is_default: Some(false),
            is_active: Some(false),
        }
    }

    pub fn restore(is_default: bool) -> Self {
        Self {
            is_default: Some(is_default),
            is_active: Some(true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_default.is_none() && self.is_active.is_none()
    }

    /// Apply the patch to a record, refreshing `updated_at`.
    pub fn apply(&self, record: &mut BranchRecord, now: DateTime<Utc>) {
        if let Some(is_default) = self.is_default {
            record.is_default = is_default;
        }
        if let Some(is_active) = self.is_active {
            record.is_active = is_active;
        }
        record.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_serializes_with_document_field_names() {
        let record = BranchRecord::new(GroupId::from("pg-1"), "Main", true);
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value[FIELD_ID], Value::String(record.id.to_string()));
        assert_eq!(value[FIELD_GROUP_ID], Value::String("pg-1".to_string()));
        assert_eq!(value[FIELD_IS_DEFAULT], Value::Bool(true));
        assert_eq!(value[FIELD_IS_ACTIVE], Value::Bool(true));
        assert!(value.get("attributes").is_none());

        let back: BranchRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_field_value_matches_serialized_fields() {
        let record = BranchRecord::new(GroupId::from("pg-1"), "Main", false);
        assert_eq!(record.field_value(FIELD_IS_DEFAULT), Value::Bool(false));
        assert_eq!(
            record.field_value(FIELD_GROUP_ID),
            Value::String("pg-1".to_string())
        );
        assert_eq!(record.field_value("floor"), Value::Null);
    }

    #[test]
    fn test_normalized_name() {
        let record = BranchRecord::new(GroupId::from("pg-1"), "  Main Street ", false);
        assert_eq!(record.normalized_name(), "main street");
    }

    #[test]
    fn test_seniority_breaks_timestamp_ties_by_id() {
        let now = Utc::now();
        let older = BranchRecord::with_created_at(GroupId::from("pg"), "a", false, now);
        let newer =
            BranchRecord::with_created_at(GroupId::from("pg"), "b", false, now + Duration::seconds(1));
        assert_eq!(older.seniority(&newer), Ordering::Less);

        let twin = BranchRecord::with_created_at(GroupId::from("pg"), "c", false, now);
        assert_eq!(older.seniority(&twin), older.id.cmp(&twin.id));
    }

    #[test]
    fn test_flag_patch_retire_clears_default() {
        let mut record = BranchRecord::new(GroupId::from("pg"), "Main", true);
        let later = record.updated_at + Duration::seconds(5);
        FlagPatch::retire().apply(&mut record, later);

        assert!(!record.is_active);
        assert!(!record.is_default);
        assert_eq!(record.updated_at, later);
    }

    #[test]
    fn test_branch_id_parses_display_form() {
        let id = BranchId::new();
        let parsed: BranchId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<BranchId>().is_err());
    }
}
