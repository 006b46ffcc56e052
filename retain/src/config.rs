use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Save/load adapter settings. Every field has a default, so partial
/// documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Key of the one save slot entry the adapter owns.
    pub save_key: String,
    /// Root tag of the saved document.
    pub root: String,
    pub eager_on_load: bool,
    pub lazy_on_load: bool,
    /// Pretty copy of every saved document, for inspection.
    pub dump_path: Option<PathBuf>,
}

// Implementations

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            save_key: "retain".to_owned(),
            root: "retain".to_owned(),
            eager_on_load: true,
            lazy_on_load: true,
            dump_path: None,
        }
    }
}

impl AdapterConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid adapter config")
    }

    pub fn with_save_key(mut self, save_key: impl Into<String>) -> Self {
        self.save_key = save_key.into();
        self
    }

    pub fn with_dump_path(mut self, dump_path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(dump_path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = AdapterConfig::from_json(r#"{ "eager_on_load": false }"#).unwrap();

        assert!(!config.eager_on_load);
        assert!(config.lazy_on_load);
        assert_eq!(config.root, "retain");
        assert_eq!(config.dump_path, None);
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(AdapterConfig::from_json(r#"{ "lazy_on_load": "yes" }"#).is_err());
    }
}
