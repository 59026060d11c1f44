//! Configuration
//!
//! All settings have defaults; a JSON document only needs the keys it wants
//! to override:
//!
//! ```json
//! { "cache": { "capacity": 2000 }, "graph": { "max_evaluation_depth": 256 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings for the compute cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of cached values before least-recently-used entries
    /// are evicted.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 50_000 }
    }
}

/// Settings for graph editing and evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Deepest upstream chain a single pull may walk.
    pub max_evaluation_depth: usize,

    /// When set, writing a value whose hash equals the current one does not
    /// dirty anything.
    pub skip_unchanged_values: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_evaluation_depth: 1024,
            skip_unchanged_values: true,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheConfig,
    pub graph: GraphConfig,
}

impl Config {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.capacity",
                reason: "must be at least 1",
            });
        }
        if self.graph.max_evaluation_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "graph.max_evaluation_depth",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn partial_override() {
        let config = Config::from_json(r#"{ "cache": { "capacity": 12 } }"#).unwrap();
        assert_eq!(config.cache.capacity, 12);
        assert_eq!(config.graph, GraphConfig::default());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Config::from_json(r#"{ "cache": { "capacity": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache.capacity", .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_json(r#"{ "cahce": {} }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/trellis.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/trellis.json"));
    }
}
