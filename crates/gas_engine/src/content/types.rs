use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPlanRequest {
    pub enabled_mods: Vec<String>,
}

impl ContentPlanRequest {
    /// Parses a comma separated mod list such as `GAS_ENABLED_MODS`.
    /// Blank entries are kept so discovery can reject them.
    pub fn from_mod_list(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        Self {
            enabled_mods: raw.split(',').map(|entry| entry.trim().to_string()).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ContentPlanError {
    #[error("enabled mod id cannot be empty")]
    EmptyEnabledMod,
    #[error("duplicate enabled mod id in request: {mod_id}")]
    DuplicateEnabledMod { mod_id: String },
    #[error("enabled mod does not exist on disk: {mod_id} at {expected_dir}")]
    EnabledModMissing {
        mod_id: String,
        expected_dir: PathBuf,
    },
}
