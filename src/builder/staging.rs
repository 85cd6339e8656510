//! Slot staging
//!
//! Runs each manifest slot's operation chain, parks the stored bytes in a
//! temporary file, and produces the matching binary descriptor and metadata
//! entry. Staging keeps manifest order; that order is the slot-table order
//! and the runtime extraction order.

use crate::error::{PspfError, Result};
use crate::format::chain::{chain_to_string, pack_operations, string_to_chain};
use crate::format::constants::DEFAULT_FILE_PERMS;
use crate::format::manifest::{BuildManifest, ManifestSlot};
use crate::format::metadata::SlotInfo;
use crate::format::slots::{Lifecycle, PlatformReq, Purpose, SlotDescriptor};
use crate::pipeline::apply_chain;
use log::{debug, info};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A fully staged slot, ready for assembly
#[derive(Debug)]
pub struct StagedSlot {
    /// Binary descriptor; `offset` is patched during assembly
    pub descriptor: SlotDescriptor,
    /// Metadata document entry
    pub info: SlotInfo,
    /// Stored bytes, spooled to disk
    pub file: NamedTempFile,
}

/// Stage every slot in the manifest, in manifest order.
pub(super) fn stage_slots(
    manifest: &BuildManifest,
    base_dir: &Path,
    deterministic: bool,
) -> Result<Vec<StagedSlot>> {
    let mut staged = Vec::with_capacity(manifest.slots.len());
    for (i, slot) in manifest.slots.iter().enumerate() {
        info!("🎰 staging slot {i}: {}", slot.name);
        staged.push(stage_slot(i as u64, slot, base_dir, deterministic)?);
    }
    Ok(staged)
}

fn stage_slot(
    id: u64,
    slot: &ManifestSlot,
    base_dir: &Path,
    deterministic: bool,
) -> Result<StagedSlot> {
    let source = resolve_source(&slot.source, base_dir);
    let ops = string_to_chain(&slot.operations)?;

    let result = apply_chain(&source, &ops, deterministic).map_err(|e| {
        PspfError::Build(format!("slot {:?}: {e}", slot.name))
    })?;

    let mut file = NamedTempFile::new()?;
    file.write_all(&result.bytes)?;
    file.flush()?;

    let permissions = match &slot.permissions {
        Some(text) => u16::from_str_radix(text.trim_start_matches("0o"), 8)
            .map_err(|_| PspfError::Config(format!("bad permissions {text:?}")))?,
        None => DEFAULT_FILE_PERMS,
    };

    let mut descriptor = SlotDescriptor::new(id, &slot.name);
    descriptor.size = result.stored_size;
    descriptor.original_size = result.original_size;
    descriptor.operations = pack_operations(&ops)?;
    descriptor.checksum = u64::from_le_bytes(result.sha256[..8].try_into().unwrap_or_default());
    descriptor.purpose = Purpose::parse(&slot.purpose)
        .unwrap_or(Purpose::Data) as u8;
    descriptor.lifecycle = Lifecycle::parse(&slot.lifecycle)
        .unwrap_or(Lifecycle::Runtime) as u8;
    descriptor.priority = slot.priority;
    descriptor.platform_req = PlatformReq::parse(&slot.platform)
        .unwrap_or(PlatformReq::Any) as u8;
    descriptor.permissions = permissions;

    let info = SlotInfo {
        name: slot.name.clone(),
        purpose: slot.purpose.clone(),
        lifecycle: slot.lifecycle.clone(),
        extract_to: slot.extract_to.clone(),
        operations: chain_to_string(&ops),
        original_size: result.original_size,
        size: result.stored_size,
        sha256: hex::encode(result.sha256),
    };

    debug!(
        "slot {:?}: {} -> {} bytes, sha256 {}",
        slot.name,
        result.original_size,
        result.stored_size,
        &info.sha256[..16]
    );

    Ok(StagedSlot {
        descriptor,
        info,
        file,
    })
}

/// Slot sources are relative to the manifest's directory unless absolute.
fn resolve_source(source: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(source);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::manifest::{ManifestExecution, ManifestPackage};
    use std::fs;

    fn manifest_with_slot(slot: ManifestSlot) -> BuildManifest {
        BuildManifest {
            package: ManifestPackage {
                name: "t".into(),
                version: "0.0.1".into(),
                description: None,
                author: None,
                license: None,
            },
            execution: ManifestExecution {
                command: "{workenv}/run".into(),
            },
            slots: vec![slot],
        }
    }

    #[test]
    fn staged_slot_matches_its_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/run.sh"), b"#!/bin/sh\necho HELLO\n").unwrap();

        let manifest = manifest_with_slot(ManifestSlot {
            name: "app".into(),
            source: "app".into(),
            extract_to: String::new(),
            operations: "tar.gz".into(),
            purpose: "code".into(),
            lifecycle: "runtime".into(),
            platform: "any".into(),
            permissions: None,
            priority: 10,
        });

        let staged = stage_slots(&manifest, dir.path(), true).unwrap();
        assert_eq!(staged.len(), 1);
        let slot = &staged[0];
        assert_eq!(slot.descriptor.id, 0);
        assert_eq!(slot.descriptor.purpose, Purpose::Code as u8);
        assert_eq!(slot.descriptor.priority, 10);
        assert!(slot.descriptor.size > 0);
        assert_eq!(slot.info.operations, "tar.gz");
        assert_eq!(slot.info.size, slot.descriptor.size);

        let stored = fs::read(slot.file.path()).unwrap();
        assert_eq!(stored.len() as u64, slot.descriptor.size);
        // Descriptor checksum is the SHA-256 prefix of the stored bytes
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(&stored);
        assert_eq!(
            slot.descriptor.checksum,
            u64::from_le_bytes(digest[..8].try_into().unwrap())
        );
        assert_eq!(slot.info.sha256, hex::encode(digest));
    }

    #[test]
    fn missing_source_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_with_slot(ManifestSlot {
            name: "gone".into(),
            source: "nope".into(),
            extract_to: String::new(),
            operations: "tar.gz".into(),
            purpose: "data".into(),
            lifecycle: "runtime".into(),
            platform: "any".into(),
            permissions: None,
            priority: 0,
        });
        let err = stage_slots(&manifest, dir.path(), true).unwrap_err();
        assert!(matches!(err, PspfError::Build(_)));
    }
}
