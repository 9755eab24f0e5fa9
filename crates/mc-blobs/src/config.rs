//! TOML configuration of a blob store.
//!
//! ```toml
//! persist_interval_secs = 60
//!
//! [[storage_folders]]
//! path = "/var/lib/mcblobs/disk0"
//! maximum_size = 1_000_000_000
//!
//! [[storage_folders]]
//! path = "/mnt/disk1/mcblobs"
//! maximum_size = 4_000_000_000
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mc_types::StorageFolderConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 60;

/// Problems with a configuration file, found before touching any folder.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("at least one storage folder must be configured")]
    NoStorageFolder,

    #[error("storage folder {} has a maximum size of zero", .0.display())]
    ZeroMaximumSize(PathBuf),

    #[error("storage folder {} is listed more than once", .0.display())]
    DuplicatePath(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Seconds between two metadata saves of the periodic persister.
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,

    #[serde(default)]
    pub storage_folders: Vec<StorageFolderConfig>,
}

fn default_persist_interval() -> u64 {
    DEFAULT_PERSIST_INTERVAL_SECS
}

impl StoreConfig {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        content.parse()
    }

    /// # Errors
    ///
    /// Returns an error if no folder is listed, a folder has a zero
    /// maximum size, or the same path is listed twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_folders.is_empty() {
            return Err(ConfigError::NoStorageFolder);
        }
        let mut seen = HashSet::new();
        for folder in &self.storage_folders {
            if folder.maximum_size == 0 {
                return Err(ConfigError::ZeroMaximumSize(folder.path.clone()));
            }
            if !seen.insert(&folder.path) {
                return Err(ConfigError::DuplicatePath(folder.path.clone()));
            }
        }
        Ok(())
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs.max(1))
    }
}

impl std::str::FromStr for StoreConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_folders_and_defaults() {
        let config: StoreConfig = r#"
            [[storage_folders]]
            path = "/data/a"
            maximum_size = 1000

            [[storage_folders]]
            path = "relative/b"
            maximum_size = 2_000
        "#
        .parse()
        .unwrap();

        assert_eq!(config.persist_interval_secs, DEFAULT_PERSIST_INTERVAL_SECS);
        assert_eq!(
            config.storage_folders,
            vec![
                StorageFolderConfig::new("/data/a", 1000),
                StorageFolderConfig::new("relative/b", 2000),
            ]
        );
        assert_eq!(config.persist_interval(), Duration::from_secs(60));
    }

    #[test]
    fn rejects_empty_folder_list() {
        let err = "persist_interval_secs = 5".parse::<StoreConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::NoStorageFolder));
    }

    #[test]
    fn rejects_zero_maximum_and_duplicates() {
        let zero = "[[storage_folders]]\npath = \"a\"\nmaximum_size = 0\n";
        assert!(matches!(
            zero.parse::<StoreConfig>(),
            Err(ConfigError::ZeroMaximumSize(_))
        ));

        let twice = "[[storage_folders]]\npath = \"a\"\nmaximum_size = 1\n\
                     [[storage_folders]]\npath = \"a\"\nmaximum_size = 2\n";
        assert!(matches!(
            twice.parse::<StoreConfig>(),
            Err(ConfigError::DuplicatePath(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            "storage_folders = 3".parse::<StoreConfig>(),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
