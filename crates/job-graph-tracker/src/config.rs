//! Tracker configuration
//!
//! Handles persistent storage of event batching and filter defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{defaults, paths};
use crate::Result;

/// Name-prefix filters applied to the nodes of an asset link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkFilters {
    /// Hide nodes whose name does not start with `node_filter`
    pub use_node_filter: bool,
    pub node_filter: String,
    /// Auto-load only nodes whose name starts with `output_filter`
    pub use_output_filter: bool,
    pub output_filter: String,
}

/// Full tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Maximum events drained from one execution context per tick
    pub max_events_per_context: usize,
    /// Zero tallies of reused nodes when a link is initialised
    pub zero_tallies_on_link: bool,
    /// Cook the selected network whenever the hosting asset cooks
    pub auto_cook: bool,
    /// Filters given to newly registered links
    pub default_filters: LinkFilters,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_events_per_context: defaults::MAX_EVENTS_PER_CONTEXT,
            zero_tallies_on_link: defaults::ZERO_TALLIES_ON_LINK,
            auto_cook: defaults::AUTO_COOK,
            default_filters: LinkFilters::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from `config_dir`, falling back to defaults
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_dir.as_ref().join(paths::CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let config = serde_json::from_str(&contents)?;
        log::debug!("Loaded tracker configuration from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to `config_dir`
    pub fn save(&self, config_dir: impl AsRef<Path>) -> Result<()> {
        std::fs::create_dir_all(config_dir.as_ref())?;

        let config_path = config_dir.as_ref().join(paths::CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        log::info!("Tracker configuration saved to {:?}", config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = TrackerConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.max_events_per_context, 20);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested");

        let config = TrackerConfig {
            max_events_per_context: 5,
            auto_cook: true,
            default_filters: LinkFilters {
                use_output_filter: true,
                output_filter: "out_".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        config.save(&dir).unwrap();

        let loaded = TrackerConfig::load(&dir).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(paths::CONFIG_FILE),
            r#"{ "maxEventsPerContext": 3 }"#,
        )
        .unwrap();

        let loaded = TrackerConfig::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.max_events_per_context, 3);
        assert!(loaded.zero_tallies_on_link);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(paths::CONFIG_FILE), "{ not json").unwrap();
        assert!(TrackerConfig::load(temp_dir.path()).is_err());
    }
}
