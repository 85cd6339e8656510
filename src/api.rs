//! High-level API for PSPF operations

use crate::error::Result;
use crate::validation::validation_level;
use crate::verify::VerifyReport;
use std::path::{Path, PathBuf};

/// Options for building a package
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Path to the launcher binary prepended to the package
    pub launcher_bin: Option<PathBuf>,
    /// Seed for deterministic key generation (implies deterministic build)
    pub key_seed: Option<String>,
    /// Path to a private key file (PEM)
    pub private_key_path: Option<PathBuf>,
    /// Where to persist a generated private key (PEM)
    pub private_key_out: Option<PathBuf>,
    /// Where to persist a generated public key (PEM)
    pub public_key_out: Option<PathBuf>,
    /// Skip the post-build verification pass
    pub skip_verification: bool,
}

/// Options for launching a package
#[derive(Debug, Default)]
pub struct LaunchOptions {
    /// Override the workenv cache root
    pub cache_root: Option<PathBuf>,
}

/// Build a package from a manifest.
pub fn build_package(manifest_path: &Path, output_path: &Path, options: &BuildOptions) -> Result<()> {
    crate::builder::build(manifest_path, output_path, options)
}

/// Launch a package, returning the payload's exit code (spawn mode).
pub fn launch_package(package_path: &Path, args: &[String], options: &LaunchOptions) -> Result<i32> {
    crate::launcher::launch(package_path, args, options)
}

/// Verify a package under the environment-selected validation level.
pub fn verify_package(package_path: &Path) -> Result<VerifyReport> {
    crate::verify::verify_package(package_path, validation_level())
}
