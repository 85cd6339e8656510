//! Package builder
//!
//! Consumes a manifest plus slot sources and produces a fully assembled,
//! signed package: launcher prefix, index block, gzipped metadata, slot
//! data in manifest order, magic trailer. Offsets are computed in a
//! pre-pass so the file is written in one forward sweep.

mod metadata;
mod staging;

pub use staging::StagedSlot;

use crate::api::BuildOptions;
use crate::crypto;
use crate::error::{PspfError, Result};
use crate::format::constants::{
    DEFAULT_EXECUTABLE_PERMS, INDEX_SIZE, SLOT_ALIGNMENT, TRAILER, align_offset,
};
use crate::format::index::Index;
use crate::format::manifest::BuildManifest;
use crate::format::metadata::compress_metadata;
use crate::validation::ValidationLevel;
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Build a package from a manifest file.
pub fn build(manifest_path: &Path, output_path: &Path, options: &BuildOptions) -> Result<()> {
    info!("🔨 building package from {}", manifest_path.display());

    let manifest = BuildManifest::load(manifest_path)?;
    let base_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let launcher = read_launcher(options)?;
    let (signing_key, verifying_key) = resolve_keys(options)?;

    let deterministic = options.key_seed.is_some();
    let staged = staging::stage_slots(&manifest, &base_dir, deterministic)?;

    let slot_infos = staged.iter().map(|slot| slot.info.clone()).collect();
    let document = metadata::build_metadata(&manifest, slot_infos, options.key_seed.as_deref());
    let canonical = document.canonical_bytes()?;
    let signature = crypto::sign(&signing_key, &canonical);
    let compressed = compress_metadata(&canonical)?;

    assemble(
        output_path,
        &launcher,
        &compressed,
        staged,
        &verifying_key,
        &signature,
    )?;

    info!(
        "✅ built {} ({} v{})",
        output_path.display(),
        manifest.package.name,
        manifest.package.version
    );

    if !options.skip_verification {
        crate::verify::verify_package(output_path, ValidationLevel::Standard)?;
        debug!("post-build verification passed");
    }

    Ok(())
}

/// Concatenate launcher, index, metadata, slot data and trailer.
///
/// Slot offsets are assigned here (8-byte aligned, in declared order) and
/// written into the index before anything hits the disk, so a single
/// forward pass suffices.
fn assemble(
    output_path: &Path,
    launcher: &[u8],
    compressed_metadata: &[u8],
    mut staged: Vec<StagedSlot>,
    verifying_key: &VerifyingKey,
    signature: &[u8; 64],
) -> Result<()> {
    let launcher_size = launcher.len() as u64;
    let metadata_offset = launcher_size + INDEX_SIZE as u64;
    let metadata_size = compressed_metadata.len() as u64;

    let mut cursor = metadata_offset + metadata_size;
    for slot in &mut staged {
        cursor = align_offset(cursor, SLOT_ALIGNMENT);
        slot.descriptor.offset = cursor;
        cursor += slot.descriptor.size;
    }

    let mut index = Index::new();
    index.launcher_size = launcher_size;
    index.metadata_offset = metadata_offset;
    index.metadata_size = metadata_size;
    index.public_key = verifying_key.to_bytes();
    index.signature = *signature;
    index.slots = staged.iter().map(|slot| slot.descriptor).collect();
    let index_bytes = index.pack()?;

    let file = File::create(output_path)?;
    let mut out = BufWriter::new(file);
    out.write_all(launcher)?;
    out.write_all(&index_bytes)?;
    out.write_all(compressed_metadata)?;

    let mut written = metadata_offset + metadata_size;
    for slot in &staged {
        let padding = slot.descriptor.offset - written;
        if padding > 0 {
            out.write_all(&vec![0u8; padding as usize])?;
        }
        let mut stored = File::open(slot.file.path())?;
        let copied = io::copy(&mut stored, &mut out)?;
        if copied != slot.descriptor.size {
            return Err(PspfError::Build(format!(
                "slot {} wrote {copied} bytes, staged {}",
                slot.descriptor.id, slot.descriptor.size
            )));
        }
        written = slot.descriptor.offset + slot.descriptor.size;
        debug!(
            "📍 wrote slot {} at {:#x} ({} bytes)",
            slot.descriptor.id, slot.descriptor.offset, slot.descriptor.size
        );
    }

    out.write_all(TRAILER)?;
    let mut file = out
        .into_inner()
        .map_err(|e| PspfError::Build(format!("flush failed: {e}")))?;
    file.flush()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(output_path)?.permissions();
        perms.set_mode(u32::from(DEFAULT_EXECUTABLE_PERMS));
        fs::set_permissions(output_path, perms)?;
    }

    Ok(())
}

/// Load the launcher prefix from options or `FLAVOR_LAUNCHER_BIN`.
fn read_launcher(options: &BuildOptions) -> Result<Vec<u8>> {
    let path = if let Some(ref explicit) = options.launcher_bin {
        explicit.clone()
    } else if let Ok(from_env) = std::env::var("FLAVOR_LAUNCHER_BIN") {
        PathBuf::from(from_env)
    } else {
        return Err(PspfError::Config(
            "launcher binary required: pass --launcher-bin or set FLAVOR_LAUNCHER_BIN".to_string(),
        ));
    };

    fs::read(&path)
        .map_err(|e| PspfError::Build(format!("cannot read launcher {}: {e}", path.display())))
}

/// Pick the signing keypair per the configured key mode.
fn resolve_keys(options: &BuildOptions) -> Result<(SigningKey, VerifyingKey)> {
    if let Some(ref seed) = options.key_seed {
        return Ok(crypto::keypair_from_seed(seed));
    }

    if let Some(ref private_path) = options.private_key_path {
        return crypto::load_signing_key(private_path);
    }

    warn!("⚠️ no key material given, generating an ephemeral keypair");
    let (signing_key, verifying_key) = crypto::keypair_random();
    if let (Some(private_out), Some(public_out)) =
        (&options.private_key_out, &options.public_key_out)
    {
        crypto::save_keypair(&signing_key, &verifying_key, private_out, public_out)?;
    }
    Ok((signing_key, verifying_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::TRAILER_SIZE;
    use crate::reader::Reader;
    use crate::validation::ValidationLevel;
    use crate::verify::verify_package;

    /// Stub launcher prefix, deliberately tiny and unaligned.
    const STUB_LAUNCHER: &[u8] = b"\x7FEL";

    fn write_hello_tree(dir: &Path) {
        fs::create_dir_all(dir.join("app")).unwrap();
        fs::write(dir.join("app/run.sh"), b"#!/bin/sh\necho HELLO\n").unwrap();
        fs::write(dir.join("app/data.bin"), vec![0x5A; 1024]).unwrap();
    }

    fn hello_manifest(dir: &Path) -> PathBuf {
        let manifest = dir.join("manifest.json");
        fs::write(
            &manifest,
            r#"{
                "package": {"name": "hello", "version": "1.0.0"},
                "execution": {"command": "{workenv}/run.sh"},
                "slots": [
                    {"name": "app", "source": "app", "extract_to": "", "operations": "tar.gz"}
                ]
            }"#,
        )
        .unwrap();
        manifest
    }

    fn build_hello(dir: &Path, seed: &str) -> PathBuf {
        write_hello_tree(dir);
        let manifest = hello_manifest(dir);
        let launcher = dir.join("launcher.bin");
        fs::write(&launcher, STUB_LAUNCHER).unwrap();

        let output = dir.join(format!("hello-{seed}.psp"));
        let options = BuildOptions {
            launcher_bin: Some(launcher),
            key_seed: Some(seed.to_string()),
            ..Default::default()
        };
        build(&manifest, &output, &options).unwrap();
        output
    }

    #[test]
    fn built_package_parses_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_hello(dir.path(), "s1");

        let mut reader = Reader::open(&package).unwrap();
        assert_eq!(reader.index().launcher_size, STUB_LAUNCHER.len() as u64);
        assert_eq!(reader.index().slots.len(), 1);

        let meta = reader.metadata().unwrap().clone();
        assert_eq!(meta.package.name, "hello");
        assert_eq!(meta.slots[0].operations, "tar.gz");
        assert_eq!(meta.build.seed.as_deref(), Some("s1"));

        let report = verify_package(&package, ValidationLevel::Strict).unwrap();
        assert!(report.all_ok());
    }

    #[test]
    fn trailer_is_the_last_eight_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_hello(dir.path(), "s1");
        let bytes = fs::read(&package).unwrap();
        assert_eq!(&bytes[bytes.len() - TRAILER_SIZE..], TRAILER);
    }

    #[test]
    fn seeded_rebuild_is_byte_identical() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let package_a = build_hello(dir_a.path(), "s1");
        let package_b = build_hello(dir_b.path(), "s1");
        assert_eq!(fs::read(&package_a).unwrap(), fs::read(&package_b).unwrap());
    }

    #[test]
    fn different_seed_changes_key_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        let package_a = build_hello(dir.path(), "s1");
        let package_b = build_hello(dir.path(), "s2");

        let reader_a = Reader::open(&package_a).unwrap();
        let reader_b = Reader::open(&package_b).unwrap();
        assert_ne!(reader_a.index().public_key, reader_b.index().public_key);
        assert_ne!(reader_a.index().signature, reader_b.index().signature);
    }

    #[test]
    fn flipped_metadata_byte_fails_signature() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_hello(dir.path(), "s1");

        let meta_offset = Reader::open(&package).unwrap().index().metadata_offset;
        let mut bytes = fs::read(&package).unwrap();
        bytes[meta_offset as usize + 10] ^= 0x01;
        fs::write(&package, &bytes).unwrap();

        let err = verify_package(&package, ValidationLevel::Standard).unwrap_err();
        assert!(matches!(
            err,
            PspfError::Signature(_) | PspfError::Format(_)
        ));
    }

    #[test]
    fn flipped_slot_byte_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_hello(dir.path(), "s1");

        let slot_offset = Reader::open(&package).unwrap().index().slots[0].offset;
        let mut bytes = fs::read(&package).unwrap();
        bytes[slot_offset as usize] ^= 0x01;
        fs::write(&package, &bytes).unwrap();

        let err = verify_package(&package, ValidationLevel::Standard).unwrap_err();
        assert!(matches!(err, PspfError::Integrity(_)));

        // Relaxed only logs it
        let report = verify_package(&package, ValidationLevel::Relaxed).unwrap();
        assert_eq!(report.bad_slots, vec!["app".to_string()]);
    }

    #[test]
    fn flipped_public_key_fails_signature() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_hello(dir.path(), "s1");

        // Key field sits at launcher_size + 0x38; refresh the CRC so only
        // the signature check can fail.
        let launcher_size = STUB_LAUNCHER.len();
        let mut bytes = fs::read(&package).unwrap();
        bytes[launcher_size + 0x38] ^= 0x01;
        let crc_at = launcher_size + 0x34;
        let index = &mut bytes[launcher_size..launcher_size + INDEX_SIZE];
        index[0x34..0x38].copy_from_slice(&[0; 4]);
        let crc = crc32fast::hash(index);
        bytes[crc_at..crc_at + 4].copy_from_slice(&crc.to_le_bytes());
        fs::write(&package, &bytes).unwrap();

        let err = verify_package(&package, ValidationLevel::Standard).unwrap_err();
        assert!(matches!(err, PspfError::Signature(_)));
    }

    #[test]
    fn slot_extraction_round_trips_through_the_package() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_hello(dir.path(), "s1");

        let reader = Reader::open(&package).unwrap();
        let stored = reader.slot_bytes(0).unwrap().to_vec();
        let ops = crate::format::chain::unpack_operations(reader.index().slots[0].operations);

        let out = tempfile::tempdir().unwrap();
        crate::pipeline::reverse_chain(&stored, &ops, out.path()).unwrap();
        assert_eq!(
            fs::read(out.path().join("run.sh")).unwrap(),
            b"#!/bin/sh\necho HELLO\n"
        );
        assert_eq!(fs::read(out.path().join("data.bin")).unwrap(), vec![0x5A; 1024]);
    }

    #[test]
    fn missing_launcher_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_hello_tree(dir.path());
        let manifest = hello_manifest(dir.path());
        let options = BuildOptions {
            key_seed: Some("s1".to_string()),
            ..Default::default()
        };
        // No launcher_bin and (in tests) no FLAVOR_LAUNCHER_BIN
        if std::env::var("FLAVOR_LAUNCHER_BIN").is_err() {
            let err = build(&manifest, &dir.path().join("out.psp"), &options).unwrap_err();
            assert!(matches!(err, PspfError::Config(_)));
        }
    }
}
