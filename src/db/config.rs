//! Store configuration.
//!
//! Only `path` is required. Configurations can be built in code or loaded
//! from a JSON file:
//!
//! ```json
//! { "path": "./data", "lifecycle": "per-operation" }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{StoreError, StoreResult};
use crate::engine::OpenMode;

/// When the engine handle is opened and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Open once, keep the handle for the store's lifetime, close once.
    ///
    /// Concurrent readers run in parallel on engine snapshots and writers
    /// are serialized by the engine.
    #[default]
    Persistent,

    /// Open and close the engine around every operation.
    ///
    /// Every operation, reads included, is mutually exclusive with every
    /// other, and each pays the engine's open cost. The directory lock is
    /// not held between operations.
    PerOperation,
}

impl Lifecycle {
    /// Whether the engine handle stays open between operations.
    pub fn holds_handle(&self) -> bool {
        matches!(self, Lifecycle::Persistent)
    }

    /// Get a human-readable description of this lifecycle.
    pub fn description(&self) -> &'static str {
        match self {
            Lifecycle::Persistent => "engine opened once; concurrency delegated to the engine",
            Lifecycle::PerOperation => "engine opened per operation; all operations serialized",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Persistent => write!(f, "persistent"),
            Lifecycle::PerOperation => write!(f, "per-operation"),
        }
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "persistent" => Ok(Lifecycle::Persistent),
            "per-operation" | "per_operation" | "peroperation" => Ok(Lifecycle::PerOperation),
            _ => Err(format!("unknown lifecycle: {}", s)),
        }
    }
}

fn default_create_if_missing() -> bool {
    true
}

/// Store configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the store directory.
    pub path: PathBuf,
    /// Engine lifecycle strategy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Create the directory if it doesn't exist.
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,
    /// Engine page cache size in bytes; the engine default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<usize>,
}

impl StoreConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lifecycle: Lifecycle::default(),
            create_if_missing: default_create_if_missing(),
            cache_size: None,
        }
    }

    /// Set the lifecycle strategy.
    pub fn lifecycle(mut self, value: Lifecycle) -> Self {
        self.lifecycle = value;
        self
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set the engine cache size in bytes.
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> StoreResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("path must not be empty".into()));
        }
        Ok(())
    }

    /// How the backend should treat a missing directory.
    pub fn open_mode(&self) -> OpenMode {
        if self.create_if_missing {
            OpenMode::CreateIfMissing
        } else {
            OpenMode::MustExist
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("/tmp/store");
        assert_eq!(config.lifecycle, Lifecycle::Persistent);
        assert!(config.create_if_missing);
        assert_eq!(config.cache_size, None);
        assert_eq!(config.open_mode(), OpenMode::CreateIfMissing);
    }

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/store")
            .lifecycle(Lifecycle::PerOperation)
            .create_if_missing(false);
        assert!(!config.lifecycle.holds_handle());
        assert_eq!(config.open_mode(), OpenMode::MustExist);
    }

    #[test]
    fn test_from_json_only_path() {
        let config = StoreConfig::from_json(r#"{ "path": "./data" }"#).unwrap();
        assert_eq!(config, StoreConfig::new("./data"));
    }

    #[test]
    fn test_from_json_full() {
        let config = StoreConfig::from_json(
            r#"{ "path": "./data", "lifecycle": "per-operation", "create_if_missing": false, "cache_size": 1048576 }"#,
        )
        .unwrap();
        assert_eq!(config.lifecycle, Lifecycle::PerOperation);
        assert!(!config.create_if_missing);
        assert_eq!(config.cache_size, Some(1 << 20));
    }

    #[test]
    fn test_from_json_rejects_missing_or_empty_path() {
        assert!(matches!(
            StoreConfig::from_json("{}"),
            Err(StoreError::InvalidConfig(_))
        ));
        assert!(matches!(
            StoreConfig::from_json(r#"{ "path": "" }"#),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_parse_lifecycle() {
        assert_eq!("persistent".parse::<Lifecycle>().unwrap(), Lifecycle::Persistent);
        assert_eq!("PER-OPERATION".parse::<Lifecycle>().unwrap(), Lifecycle::PerOperation);
        assert_eq!("per_operation".parse::<Lifecycle>().unwrap(), Lifecycle::PerOperation);
        assert!("sometimes".parse::<Lifecycle>().is_err());
        assert_eq!(Lifecycle::PerOperation.to_string(), "per-operation");
    }
}
