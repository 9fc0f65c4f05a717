//! Configuration for archive sessions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{DEFAULT_INDEX_PATH, Result, StorageError};

/// Configuration for an archive session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the sidecar catalog, keeplist and shadow tree
    pub cache_dir: PathBuf,

    /// Walk the directory graph even when the sidecar catalog is valid
    pub force_rescan: bool,

    /// Shadow original payloads before they are overwritten
    pub track_originals: bool,

    /// Catalog path of the index bundle
    pub index_path: String,

    /// Bytes hashed at each end of the archive for the fingerprint
    pub fingerprint_window: u64,

    /// Extracted bytes appended when a data bundle is first stored
    pub bundle_headroom: u64,

    /// Multiplier applied to the payload length when a bundle grows
    pub growth_factor: u64,

    /// Smallest number of bytes a bundle grows by
    pub min_growth: u64,

    /// Let relocated records take over the free-list head record
    pub reuse_free_record: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("keep"),
            force_rescan: false,
            track_originals: false,
            index_path: DEFAULT_INDEX_PATH.to_string(),
            fingerprint_window: 20_000_000,
            bundle_headroom: 1_000_000,
            growth_factor: 10,
            min_growth: 10_000_000,
            reuse_free_record: true,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with the specified cache directory
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            StorageError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.fingerprint_window == 0 {
            return Err(StorageError::Config(
                "fingerprint_window must be positive".to_string(),
            ));
        }
        if self.growth_factor == 0 && self.min_growth == 0 {
            return Err(StorageError::Config(
                "growth_factor and min_growth cannot both be zero".to_string(),
            ));
        }
        if !self.index_path.starts_with(crate::PATH_PREFIX) {
            return Err(StorageError::Config(format!(
                "index_path must start with {}: {}",
                crate::PATH_PREFIX,
                self.index_path
            )));
        }
        Ok(())
    }

    /// Set the cache directory
    #[must_use]
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Force a full directory walk on open
    #[must_use]
    pub const fn with_force_rescan(mut self, force: bool) -> Self {
        self.force_rescan = force;
        self
    }

    /// Enable or disable the shadow cache
    #[must_use]
    pub const fn with_track_originals(mut self, track: bool) -> Self {
        self.track_originals = track;
        self
    }

    /// Set the catalog path of the index bundle
    #[must_use]
    pub fn with_index_path(mut self, path: impl Into<String>) -> Self {
        self.index_path = path.into();
        self
    }

    /// Set the fingerprint window
    #[must_use]
    pub const fn with_fingerprint_window(mut self, window: u64) -> Self {
        self.fingerprint_window = window;
        self
    }

    /// Set the headroom added when a data bundle is first stored
    #[must_use]
    pub const fn with_bundle_headroom(mut self, headroom: u64) -> Self {
        self.bundle_headroom = headroom;
        self
    }

    /// Set the bundle growth policy
    #[must_use]
    pub const fn with_growth(mut self, factor: u64, minimum: u64) -> Self {
        self.growth_factor = factor;
        self.min_growth = minimum;
        self
    }

    /// Allow or forbid reuse of the free-list head record
    #[must_use]
    pub const fn with_free_record_reuse(mut self, reuse: bool) -> Self {
        self.reuse_free_record = reuse;
        self
    }
}
