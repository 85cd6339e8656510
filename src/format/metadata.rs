//! Package metadata document
//!
//! The metadata is a JSON object, gzip-compressed inside the package. The
//! Ed25519 signature covers the *uncompressed* canonical bytes so tooling
//! without gzip can still verify. Canonical form: compact JSON with the
//! struct field order below, no trailing newline. Field order is part of the
//! format; reordering fields changes the signed bytes.

use crate::error::{PspfError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Top-level metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub format: String,
    pub package: PackageInfo,
    pub execution: ExecutionInfo,
    pub slots: Vec<SlotInfo>,
    pub build: BuildInfo,
}

/// Package identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

/// How to start the payload. The command may contain `{workenv}`,
/// `{slot:N}` and `{package}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub command: String,
}

/// Per-slot metadata mirroring the binary descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    pub purpose: String,
    pub lifecycle: String,
    pub extract_to: String,
    pub operations: String, // symbolic chain: "tar.gz", "zstd", "raw", ...
    pub original_size: u64,
    pub size: u64,
    pub sha256: String, // hex, full 32 bytes
}

/// Build provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    pub timestamp: String, // RFC-3339; seed-derived in deterministic mode
    pub builder: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

impl Metadata {
    /// Serialize to the canonical byte form the signature covers.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse metadata from canonical (or any) JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Gzip-compress metadata bytes for embedding in the package.
///
/// The stream carries no filename and a zero mtime, keeping deterministic
/// builds byte-identical.
pub fn compress_metadata(canonical: &[u8]) -> Result<Vec<u8>> {
    let mut compressed = Vec::new();
    let mut encoder = flate2::GzBuilder::new()
        .mtime(0)
        .write(&mut compressed, flate2::Compression::default());
    encoder.write_all(canonical)?;
    encoder.finish()?;
    Ok(compressed)
}

/// Decompress the metadata block back to canonical bytes.
pub fn decompress_metadata(compressed: &[u8]) -> Result<Vec<u8>> {
    if !compressed.starts_with(&[0x1F, 0x8B]) {
        return Err(PspfError::format(
            "metadata block is not gzip compressed".to_string(),
        ));
    }
    let mut decoder = flate2::read::GzDecoder::new(compressed);
    let mut bytes = Vec::new();
    decoder
        .read_to_end(&mut bytes)
        .map_err(|e| PspfError::format(format!("metadata decompression failed: {e}")))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Metadata {
        Metadata {
            format: "PSPF/2025".to_string(),
            package: PackageInfo {
                name: "hello".to_string(),
                version: "1.0.0".to_string(),
                description: None,
                author: None,
                license: None,
            },
            execution: ExecutionInfo {
                command: "{workenv}/run.sh".to_string(),
            },
            slots: vec![SlotInfo {
                name: "app".to_string(),
                purpose: "code".to_string(),
                lifecycle: "runtime".to_string(),
                extract_to: String::new(),
                operations: "tar.gz".to_string(),
                original_size: 2048,
                size: 512,
                sha256: "00".repeat(32),
            }],
            build: BuildInfo {
                timestamp: "2025-01-01T00:00:00+00:00".to_string(),
                builder: "pspf-builder 0.4.0".to_string(),
                platform: "linux_amd64".to_string(),
                seed: Some("s1".to_string()),
            },
        }
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let meta = sample_metadata();
        let a = meta.canonical_bytes().unwrap();
        let b = meta.clone().canonical_bytes().unwrap();
        assert_eq!(a, b);
        // Compact form: no pretty whitespace, no trailing newline
        assert!(!a.ends_with(b"\n"));
        assert!(!a.windows(2).any(|w| w == b": "));
        // Field order is fixed by the struct
        let text = String::from_utf8(a).unwrap();
        let format_at = text.find("\"format\"").unwrap();
        let package_at = text.find("\"package\"").unwrap();
        let build_at = text.find("\"build\"").unwrap();
        assert!(format_at < package_at && package_at < build_at);
    }

    #[test]
    fn gzip_round_trip() {
        let meta = sample_metadata();
        let canonical = meta.canonical_bytes().unwrap();
        let compressed = compress_metadata(&canonical).unwrap();
        assert!(compressed.starts_with(&[0x1F, 0x8B]));
        assert_eq!(decompress_metadata(&compressed).unwrap(), canonical);

        let parsed = Metadata::from_bytes(&canonical).unwrap();
        assert_eq!(parsed.package.name, "hello");
        assert_eq!(parsed.slots.len(), 1);
    }

    #[test]
    fn compressed_metadata_is_deterministic() {
        let canonical = sample_metadata().canonical_bytes().unwrap();
        let a = compress_metadata(&canonical).unwrap();
        let b = compress_metadata(&canonical).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn non_gzip_block_is_rejected() {
        assert!(decompress_metadata(b"{\"format\":\"PSPF/2025\"}").is_err());
    }
}
