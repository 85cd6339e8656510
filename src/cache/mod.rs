//! Workenv cache layout and validity
//!
//! A workenv is a content directory plus a hidden sibling metadata
//! directory:
//!
//! ```text
//! <cache-root>/<name>/                  extracted payload
//! <cache-root>/.<name>.pspf/
//!     instance/extract/lock             PID of the extracting process
//!     instance/extract/complete         presence = extraction finished
//!     instance/package.checksum         SHA-256 of the source package
//!     instance/index.json               decoded index for inspection
//!     package/psp.json                  decoded metadata
//!     tmp/<pid>/                        per-extractor scratch
//! ```
//!
//! The workenv name is a deterministic hash of (package name, version,
//! package checksum), so identical package bytes land in the same cache
//! entry on every machine.

pub mod extract;
pub mod lock;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Width of the truncated workenv identifier, in hex characters
const WORKENV_ID_WIDTH: usize = 16;

/// Compute the deterministic workenv name for a package.
pub fn workenv_id(name: &str, version: &str, package_sha256: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(version.as_bytes());
    hasher.update(b":");
    hasher.update(hex::encode(package_sha256).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..WORKENV_ID_WIDTH / 2])
}

/// All paths for one workenv
#[derive(Debug, Clone)]
pub struct WorkenvPaths {
    cache_root: PathBuf,
    name: String,
}

impl WorkenvPaths {
    pub fn new(cache_root: PathBuf, name: String) -> Self {
        Self { cache_root, name }
    }

    /// The workenv name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content directory (the extracted payload)
    pub fn content(&self) -> PathBuf {
        self.cache_root.join(&self.name)
    }

    /// Hidden metadata directory
    pub fn metadata_dir(&self) -> PathBuf {
        self.cache_root.join(format!(".{}.pspf", self.name))
    }

    /// Persistent per-instance state
    pub fn instance(&self) -> PathBuf {
        self.metadata_dir().join("instance")
    }

    /// Extraction bookkeeping directory
    pub fn extract_dir(&self) -> PathBuf {
        self.instance().join("extract")
    }

    /// Lock file holding the extractor's PID
    pub fn lock_file(&self) -> PathBuf {
        self.extract_dir().join("lock")
    }

    /// Completion marker; its presence attests a finished extraction
    pub fn complete_file(&self) -> PathBuf {
        self.extract_dir().join("complete")
    }

    /// Stored SHA-256 of the source package
    pub fn checksum_file(&self) -> PathBuf {
        self.instance().join("package.checksum")
    }

    /// Decoded index, for inspection
    pub fn index_file(&self) -> PathBuf {
        self.instance().join("index.json")
    }

    /// Decoded metadata document
    pub fn psp_metadata_file(&self) -> PathBuf {
        self.metadata_dir().join("package").join("psp.json")
    }

    /// Scratch root for in-progress extractions
    pub fn tmp(&self) -> PathBuf {
        self.metadata_dir().join("tmp")
    }

    /// Scratch directory for a specific extractor PID
    pub fn scratch_for(&self, pid: u32) -> PathBuf {
        self.tmp().join(pid.to_string())
    }
}

/// Why a cached workenv cannot be used as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Complete and matching the current package
    Valid,
    /// Never extracted, or extraction did not finish
    Incomplete,
    /// Complete but recorded for a different package checksum
    ChecksumMismatch,
}

/// Check a cached workenv against the current package checksum.
pub fn cache_status(paths: &WorkenvPaths, package_sha256: &[u8; 32]) -> CacheStatus {
    if !paths.content().is_dir() || !paths.complete_file().exists() {
        return CacheStatus::Incomplete;
    }

    match std::fs::read_to_string(paths.checksum_file()) {
        Ok(stored) if stored.trim() == hex::encode(package_sha256) => CacheStatus::Valid,
        Ok(_) => CacheStatus::ChecksumMismatch,
        Err(_) => CacheStatus::Incomplete,
    }
}

/// Remove a workenv's content and completion marker before re-extraction.
pub fn invalidate(paths: &WorkenvPaths) -> std::io::Result<()> {
    let _ = std::fs::remove_file(paths.complete_file());
    let content = paths.content();
    if content.exists() {
        std::fs::remove_dir_all(&content)?;
    }
    Ok(())
}

/// Workenv paths for a package identity under a cache root.
pub fn paths_for(cache_root: &Path, name: &str, version: &str, sha256: &[u8; 32]) -> WorkenvPaths {
    WorkenvPaths::new(cache_root.to_path_buf(), workenv_id(name, version, sha256))
}
