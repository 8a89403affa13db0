//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::file::File;

/// Environment variable that overrides the settings file location
pub const SETTINGS_ENV_VAR: &str = "ROOTSYNC_SETTINGS";

/// Storage layout for the reconciler
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for configuration
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        match std::env::var_os(SETTINGS_ENV_VAR) {
            Some(path) if !path.is_empty() => File::new(path),
            _ => File::new(self.base_dir.join("settings.json")),
        }
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/rootsync")
    }
}
