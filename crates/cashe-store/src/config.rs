use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Default cache root when none is configured.
pub const DEFAULT_ROOT: &str = "/var/cache/cashe";

/// Root path and policy flags shared by every object of one store.
///
/// Loaded from TOML; missing keys take their defaults:
///
/// ```toml
/// root = "/var/cache/cashe"
/// try_link = true
/// checksum_save = true
/// checksum_load = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Base directory of the cache.
    pub root: PathBuf,
    /// Prefer hardlinks over copies on save and load.
    pub try_link: bool,
    /// Re-digest objects after saving them.
    pub checksum_save: bool,
    /// Re-digest objects after loading them.
    pub checksum_load: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            try_link: true,
            checksum_save: true,
            checksum_load: false,
        }
    }
}

impl StoreConfig {
    /// Default policy rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_try_link(mut self, try_link: bool) -> Self {
        self.try_link = try_link;
        self
    }

    pub fn with_checksum_save(mut self, checksum_save: bool) -> Self {
        self.checksum_save = checksum_save;
        self
    }

    pub fn with_checksum_load(mut self, checksum_load: bool) -> Self {
        self.checksum_load = checksum_load;
        self
    }
}
