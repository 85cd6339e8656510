//! Whole-package verification
//!
//! One pass over a package applying the checks the active validation level
//! demands: format structure (always, by way of opening the reader),
//! Ed25519 signature over the canonical metadata, and per-slot checksums.
//! The launcher runs this before any extraction; the builder runs it as a
//! post-build self check.

use crate::crypto;
use crate::error::{PspfError, Result};
use crate::reader::Reader;
use crate::validation::ValidationLevel;
use log::{debug, warn};
use std::path::Path;

/// Outcome of a verification pass
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub format_ok: bool,
    pub signature_ok: bool,
    pub slots_checked: usize,
    pub bad_slots: Vec<String>,
    pub package_name: String,
    pub package_version: String,
}

impl VerifyReport {
    /// True when every executed check passed.
    pub fn all_ok(&self) -> bool {
        self.format_ok && self.signature_ok && self.bad_slots.is_empty()
    }
}

/// Verify an already-open package against a validation level.
///
/// Returns an error only for failures the level treats as fatal; softer
/// findings land in the report.
pub fn verify_reader(reader: &mut Reader, level: ValidationLevel) -> Result<VerifyReport> {
    let metadata = reader.metadata()?.clone();
    let mut report = VerifyReport {
        format_ok: true, // Reader::open already enforced structure
        signature_ok: true,
        slots_checked: 0,
        bad_slots: Vec::new(),
        package_name: metadata.package.name.clone(),
        package_version: metadata.package.version.clone(),
    };

    if !level.verifies_anything() {
        warn!("⚠️ FLAVOR_VALIDATION=none: skipping all verification");
        eprintln!("pspf: WARNING: validation disabled, package integrity unchecked");
        return Ok(report);
    }

    if matches!(level, ValidationLevel::Minimal) {
        debug!("minimal validation: format checks only");
        return Ok(report);
    }

    // Signature over the uncompressed canonical metadata
    let public_key = reader.index().public_key;
    let signature = reader.index().signature;
    let canonical = reader.canonical_metadata()?.to_vec();
    report.signature_ok = crypto::verify(&public_key, &canonical, &signature);
    if !report.signature_ok {
        debug!("signature verification failed");
        if level.signature_mandatory() {
            return Err(PspfError::Signature(
                "metadata signature verification failed".to_string(),
            ));
        }
    }

    // Per-slot stored-byte checksums
    let slot_count = reader.index().slots.len();
    for i in 0..slot_count {
        report.slots_checked += 1;
        if !reader.slot_checksum_ok(i)? {
            let name = metadata
                .slots
                .get(i)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("slot {i}"));
            if level.slot_checksums_mandatory() {
                return Err(PspfError::Integrity(format!(
                    "slot {name:?} checksum mismatch"
                )));
            }
            warn!("slot {name:?} checksum mismatch (continuing: {} validation)", level.as_str());
            report.bad_slots.push(name);
        }
    }

    debug!(
        "verification passed: {} v{}, {} slots",
        report.package_name, report.package_version, report.slots_checked
    );
    Ok(report)
}

/// Open and verify a package file.
pub fn verify_package(path: &Path, level: ValidationLevel) -> Result<VerifyReport> {
    let mut reader = Reader::open(path)?;
    verify_reader(&mut reader, level)
}

// Round-trip and tamper tests live in crate::builder, where packages are
// produced end to end.
