//! Payload extraction.
//!
//! The payload ships as a zip archive. Before extraction its SHA-256 digest
//! is compared against the pinned prefix, if one is configured. After
//! extraction a marker file binds the install to this device and key.

use crate::config::ClientConfig;
use crate::error::LicenseResult;
use crate::signature::{RequestSigner, now_millis};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Hex characters of the archive digest compared against the pinned value.
pub const DIGEST_PREFIX_LEN: usize = 16;

/// Name of the marker file written into every install.
pub const MARKER_FILE_NAME: &str = "style_cache.json";

/// Contents of the marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMarker {
    /// Sealed device identifier.
    pub cache_id: String,
    /// Install time, epoch millis.
    pub timestamp: i64,
    /// Sealed license key, truncated.
    pub build_id: String,
}

/// Returns the marker path for an install folder.
#[must_use]
pub fn marker_path(install_folder: &Path) -> PathBuf {
    install_folder.join(MARKER_FILE_NAME)
}

/// Hex SHA-256 of an archive.
#[must_use]
pub fn archive_digest(archive: &[u8]) -> String {
    hex::encode(Sha256::digest(archive))
}

/// Extracts payload archives.
pub struct PayloadInstaller<'a> {
    config: &'a ClientConfig,
    signer: &'a RequestSigner,
}

impl<'a> PayloadInstaller<'a> {
    pub fn new(config: &'a ClientConfig, signer: &'a RequestSigner) -> Self {
        Self { config, signer }
    }

    /// Returns false if a pinned digest is configured and does not match.
    ///
    /// The first [`DIGEST_PREFIX_LEN`] hex characters are compared. A pinned
    /// value shorter than that, or not hex, never matches.
    #[must_use]
    pub fn verify(&self, archive: &[u8]) -> bool {
        let Some(expected) = self.config.payload_digest.as_deref() else {
            return true;
        };
        if expected.is_empty() {
            return true;
        }
        let Some(prefix) = expected.get(..DIGEST_PREFIX_LEN) else {
            warn!("Pinned payload digest is shorter than {} characters", DIGEST_PREFIX_LEN);
            return false;
        };
        if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            warn!("Pinned payload digest is not hex");
            return false;
        }
        archive_digest(archive)[..DIGEST_PREFIX_LEN] == prefix.to_ascii_lowercase()
    }

    /// Extracts into `parent/<payload_dir_name>` and writes the marker.
    pub fn extract(
        &self,
        archive: &[u8],
        parent: &Path,
        key: &str,
        device_id: &str,
    ) -> LicenseResult<PathBuf> {
        let folder = parent.join(&self.config.payload_dir_name);
        fs::create_dir_all(&folder)?;

        let mut zip = ZipArchive::new(Cursor::new(archive))?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let Some(relative) = entry.enclosed_name() else {
                warn!("Skipping unsafe archive entry {}", entry.name());
                continue;
            };
            let target = folder.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir)?;
            }
            let mut out = fs::File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
        }
        debug!("Extracted {} entries into {:?}", zip.len(), folder);

        let sealed_key = self.signer.seal(key);
        let marker = InstallMarker {
            cache_id: self.signer.seal(device_id),
            timestamp: now_millis(),
            build_id: sealed_key[..16].to_string(),
        };
        fs::write(marker_path(&folder), serde_json::to_vec(&marker)?)?;

        Ok(folder)
    }
}
