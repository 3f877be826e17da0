// Naming Configuration
//
// Decides which table names denote internal intermediate objects
// (temporary names) during multi-step alterations.

use serde::{Deserialize, Serialize};

/// Prefix used for intermediate tables unless configured otherwise.
pub const DEFAULT_TEMP_PREFIX: &str = "#sql";

/// Naming configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

fn default_temp_prefix() -> String {
    DEFAULT_TEMP_PREFIX.to_string()
}

impl NamingConfig {
    /// Default built-in naming (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            temp_prefix: default_temp_prefix(),
        }
    }

    /// Temporary objects never carry externally visible identity or
    /// event subscriptions.
    pub fn is_temp(&self, table: &str) -> bool {
        !self.temp_prefix.is_empty() && table.starts_with(&self.temp_prefix)
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
