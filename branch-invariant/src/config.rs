use crate::error::InvariantError;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;

/// Configuration for the branch invariant manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantConfig {
    /// Repair the index set and retry once when a default transfer hits the
    /// legacy `{groupId, isDefault}` unique index
    #[serde(default = "default_true")]
    pub repair_on_conflict: bool,

    /// Name of the `{groupId, isActive}` listing index
    #[serde(default = "default_listing_index")]
    pub listing_index: String,

    /// Name of the non-unique `{groupId, isDefault, isActive}` lookup index
    #[serde(default = "default_lookup_index")]
    pub default_lookup_index: String,

    /// Maximum branch name length, in characters
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

fn default_true() -> bool {
    true
}

fn default_listing_index() -> String {
    "groupId_1_isActive_1".to_string()
}

fn default_lookup_index() -> String {
    "groupId_1_isDefault_1_isActive_1".to_string()
}

fn default_max_name_len() -> usize {
    120
}

impl Default for InvariantConfig {
    fn default() -> Self {
        Self {
            repair_on_conflict: default_true(),
            listing_index: default_listing_index(),
            default_lookup_index: default_lookup_index(),
            max_name_len: default_max_name_len(),
        }
    }
}

impl InvariantConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: InvariantConfig = toml::from_str(content)?;
        config.validate().map_err(InvariantError::Config)?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            InvariantError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listing_index.trim().is_empty() {
            return Err("listing_index must not be empty".to_string());
        }

        if self.default_lookup_index.trim().is_empty() {
            return Err("default_lookup_index must not be empty".to_string());
        }

        if self.listing_index == self.default_lookup_index {
            return Err(format!(
                "listing_index and default_lookup_index must differ (both are {:?})",
                self.listing_index
            ));
        }

        if self.max_name_len == 0 {
            return Err("max_name_len must be > 0".to_string());
        }

        Ok(())
    }
}
