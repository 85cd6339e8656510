//! Build manifest structures
//!
//! The manifest is the builder's JSON input: package identity, the payload
//! command, and one entry per slot in extraction order. Manifest order is
//! the contract; it becomes both the slot-table order and the runtime
//! extraction order.

use crate::error::{PspfError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Build manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    pub package: ManifestPackage,
    pub execution: ManifestExecution,
    pub slots: Vec<ManifestSlot>,
}

/// Package identity block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// Execution block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestExecution {
    pub command: String,
}

/// One slot declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSlot {
    pub name: String,
    /// Source file or directory on the build machine
    pub source: String,
    /// Destination path relative to the workenv root ("" = the root itself)
    #[serde(default)]
    pub extract_to: String,
    /// Symbolic operation chain, e.g. "tar.gz", "zstd", "raw"
    #[serde(default)]
    pub operations: String,
    #[serde(default = "default_purpose")]
    pub purpose: String,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Octal permission string for single-file slots, e.g. "0755"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default)]
    pub priority: u8,
}

fn default_purpose() -> String {
    "data".to_string()
}

fn default_lifecycle() -> String {
    "runtime".to_string()
}

fn default_platform() -> String {
    "any".to_string()
}

impl BuildManifest {
    /// Read and validate a manifest from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            PspfError::Config(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        let manifest: BuildManifest = serde_json::from_str(&data)
            .map_err(|e| PspfError::Config(format!("invalid manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural validation before any slot is staged.
    pub fn validate(&self) -> Result<()> {
        if self.package.name.is_empty() {
            return Err(PspfError::Config("package.name is required".to_string()));
        }
        if self.package.version.is_empty() {
            return Err(PspfError::Config("package.version is required".to_string()));
        }
        if self.execution.command.trim().is_empty() {
            return Err(PspfError::Config(
                "execution.command is required".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for slot in &self.slots {
            if slot.name.is_empty() {
                return Err(PspfError::Config("slot name is required".to_string()));
            }
            if !seen.insert(slot.name.as_str()) {
                return Err(PspfError::Config(format!(
                    "duplicate slot name {:?}",
                    slot.name
                )));
            }
            crate::format::chain::string_to_chain(&slot.operations)?;
            if crate::format::slots::Purpose::parse(&slot.purpose).is_none() {
                return Err(PspfError::Config(format!(
                    "slot {:?}: unknown purpose {:?}",
                    slot.name, slot.purpose
                )));
            }
            if crate::format::slots::Lifecycle::parse(&slot.lifecycle).is_none() {
                return Err(PspfError::Config(format!(
                    "slot {:?}: unknown lifecycle {:?}",
                    slot.name, slot.lifecycle
                )));
            }
            if crate::format::slots::PlatformReq::parse(&slot.platform).is_none() {
                return Err(PspfError::Config(format!(
                    "slot {:?}: unknown platform {:?}",
                    slot.name, slot.platform
                )));
            }
            if let Some(perms) = &slot.permissions {
                u16::from_str_radix(perms.trim_start_matches("0o"), 8).map_err(|_| {
                    PspfError::Config(format!(
                        "slot {:?}: bad permission string {perms:?}",
                        slot.name
                    ))
                })?;
            }
        }
        Ok(())
    }
}
