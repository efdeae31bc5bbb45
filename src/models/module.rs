//! Module execution result model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result returned by a module's `main`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub success: bool,
    /// Something actually changed (false for "already up to date").
    #[serde(default)]
    pub updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Module-specific fields (versions, status, ...).
    #[serde(default, flatten)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl ModuleResult {
    pub fn ok(updated: bool, message: impl Into<String>) -> Self {
        Self {
            success: true,
            updated,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
