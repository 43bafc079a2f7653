//! Persisted license snapshot.
//!
//! A single JSON object `{license_key, install_folder}` stored per user.
//! Every save rewrites the whole file through a temp file and a rename, so
//! a reader never sees a partial write.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory under the user's config dir that holds agent state.
pub const CONFIG_DIR_NAME: &str = "VecnaAgent";

/// File name of the persisted snapshot.
pub const CONFIG_FILE_NAME: &str = ".vecna_config.json";

/// What survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    pub license_key: Option<String>,
    pub install_folder: Option<PathBuf>,
}

impl ConfigSnapshot {
    /// Returns the stored install folder if it still exists on disk.
    #[must_use]
    pub fn existing_install_folder(&self) -> Option<&Path> {
        self.install_folder.as_deref().filter(|p| p.exists())
    }
}

/// Reads and writes the snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at the per-user default location.
    pub fn default_location() -> LicenseResult<Self> {
        Ok(Self::new(default_config_dir()?.join(CONFIG_FILE_NAME)))
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding the snapshot.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Loads the snapshot. A missing or unreadable file yields an empty one.
    #[must_use]
    pub fn load(&self) -> ConfigSnapshot {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Ignoring corrupt config at {:?}: {}", self.path, e);
                ConfigSnapshot::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigSnapshot::default(),
            Err(e) => {
                warn!("Failed to read config at {:?}: {}", self.path, e);
                ConfigSnapshot::default()
            }
        }
    }

    /// Overwrites the snapshot.
    pub fn save(&self, snapshot: &ConfigSnapshot) -> LicenseResult<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Saved config to {:?}", self.path);
        Ok(())
    }
}

/// Returns `<config dir>/VecnaAgent`.
pub fn default_config_dir() -> LicenseResult<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(CONFIG_DIR_NAME))
        .ok_or(LicenseError::NoConfigDir)
}
