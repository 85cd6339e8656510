//! Slot transform pipeline
//!
//! A slot's bytes pass through an ordered chain of operations at build time;
//! extraction walks the same chain in reverse. The dispatch point is a flat
//! opcode table (`forward_step` / `reverse_step`), so a new opcode is one
//! more match arm, not a type hierarchy. `[TAR, GZIP]` means "tar then gzip"
//! forward and "gunzip then untar" in reverse. The empty chain is raw bytes.

pub mod tarball;

use crate::error::{PspfError, Result};
use crate::format::chain::op_name;
use crate::format::constants::{OP_BZIP2, OP_GZIP, OP_TAR, OP_XZ, OP_ZSTD};
use log::{debug, trace};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;

/// Result of running a slot's forward chain
#[derive(Debug)]
pub struct StagedBytes {
    /// The stored form, after every operation
    pub bytes: Vec<u8>,
    /// Full SHA-256 of the stored form
    pub sha256: [u8; 32],
    /// Input size before the first operation
    pub original_size: u64,
    /// Stored size (== bytes.len())
    pub stored_size: u64,
}

/// Apply an operation chain to a slot source.
///
/// `OP_TAR` may only appear first; a directory source requires it. With an
/// empty chain the source must be a single file and its bytes are stored
/// verbatim.
pub fn apply_chain(source: &Path, ops: &[u8], deterministic: bool) -> Result<StagedBytes> {
    if let Some(position) = ops.iter().rposition(|&op| op == OP_TAR) {
        if position != 0 {
            return Err(PspfError::Build(format!(
                "tar must be the first operation, found it at position {position}"
            )));
        }
    }

    let (mut data, original_size) = if ops.first() == Some(&OP_TAR) {
        let archive = tarball::create_archive(source, deterministic)?;
        let original = source_size(source)?;
        (archive, original)
    } else {
        if source.is_dir() {
            return Err(PspfError::Build(format!(
                "slot source {} is a directory but the chain does not start with tar",
                source.display()
            )));
        }
        let bytes = std::fs::read(source)
            .map_err(|e| PspfError::Build(format!("cannot read {}: {e}", source.display())))?;
        let len = bytes.len() as u64;
        (bytes, len)
    };

    let compressors = if ops.first() == Some(&OP_TAR) {
        &ops[1..]
    } else {
        ops
    };
    for &op in compressors {
        trace!("applying {} ({} bytes in)", op_name(op), data.len());
        data = forward_step(op, &data)?;
    }

    let sha256: [u8; 32] = Sha256::digest(&data).into();
    let stored_size = data.len() as u64;
    debug!(
        "staged {} -> {} bytes via {:?}",
        original_size,
        stored_size,
        ops.iter().map(|&op| op_name(op)).collect::<Vec<_>>()
    );

    Ok(StagedBytes {
        bytes: data,
        sha256,
        original_size,
        stored_size,
    })
}

/// Reverse an operation chain, materializing the slot at `target`.
///
/// With `OP_TAR` in the chain the target is a directory; otherwise the
/// decoded bytes are written to `target` as a single file. Unknown opcodes
/// fail extraction.
pub fn reverse_chain(stored: &[u8], ops: &[u8], target: &Path) -> Result<()> {
    if let Some(position) = ops.iter().rposition(|&op| op == OP_TAR) {
        if position != 0 {
            return Err(PspfError::Extraction(format!(
                "tar must be the first operation, found it at position {position}"
            )));
        }
    }

    let has_tar = ops.first() == Some(&OP_TAR);
    let compressors = if has_tar { &ops[1..] } else { ops };

    let mut data = stored.to_vec();
    for &op in compressors.iter().rev() {
        trace!("reversing {} ({} bytes in)", op_name(op), data.len());
        data = reverse_step(op, &data)?;
    }

    if has_tar {
        tarball::extract_archive(&data, target)
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &data).map_err(|e| PspfError::extraction_at(target, e))?;
        Ok(())
    }
}

/// One forward (encode) step of the opcode table.
fn forward_step(op: u8, data: &[u8]) -> Result<Vec<u8>> {
    match op {
        OP_GZIP => {
            let mut out = Vec::new();
            let mut encoder = flate2::GzBuilder::new()
                .mtime(0)
                .write(&mut out, flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?;
            Ok(out)
        }
        OP_BZIP2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(data)?;
            encoder
                .finish()
                .map_err(|e| PspfError::Build(format!("bzip2 compression failed: {e}")))
        }
        OP_XZ => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder.write_all(data)?;
            encoder
                .finish()
                .map_err(|e| PspfError::Build(format!("xz compression failed: {e}")))
        }
        OP_ZSTD => zstd::stream::encode_all(data, 0)
            .map_err(|e| PspfError::Build(format!("zstd compression failed: {e}"))),
        other => Err(PspfError::Build(format!(
            "unknown operation {other:#04x} in forward chain"
        ))),
    }
}

/// One reverse (decode) step of the opcode table.
fn reverse_step(op: u8, data: &[u8]) -> Result<Vec<u8>> {
    match op {
        OP_GZIP => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PspfError::Extraction(format!("gzip decompression failed: {e}")))?;
            Ok(out)
        }
        OP_BZIP2 => {
            let mut decoder = bzip2::read::BzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PspfError::Extraction(format!("bzip2 decompression failed: {e}")))?;
            Ok(out)
        }
        OP_XZ => {
            let mut decoder = xz2::read::XzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| PspfError::Extraction(format!("xz decompression failed: {e}")))?;
            Ok(out)
        }
        OP_ZSTD => zstd::stream::decode_all(data)
            .map_err(|e| PspfError::Extraction(format!("zstd decompression failed: {e}"))),
        other => Err(PspfError::Extraction(format!(
            "unknown operation {other:#04x} in chain"
        ))),
    }
}

/// Total content bytes under a slot source, before any operation.
fn source_size(source: &Path) -> Result<u64> {
    if source.is_file() {
        return Ok(std::fs::metadata(source)?.len());
    }
    let mut total = 0u64;
    let mut stack = vec![source.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
