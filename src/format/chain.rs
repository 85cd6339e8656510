// Operation chain packing: up to 8 byte-sized opcodes in a u64,
// least-significant byte first. 0x00 terminates the chain.

use super::constants::{MAX_CHAIN_OPS, OP_BZIP2, OP_GZIP, OP_NONE, OP_TAR, OP_XZ, OP_ZSTD};
use crate::error::{PspfError, Result};

/// Pack a list of operations into a 64-bit integer.
///
/// More than 8 operations is an error, never a silent truncation.
pub fn pack_operations(operations: &[u8]) -> Result<u64> {
    if operations.len() > MAX_CHAIN_OPS {
        return Err(PspfError::Build(format!(
            "operation chain has {} entries, maximum is {MAX_CHAIN_OPS}",
            operations.len()
        )));
    }
    if operations.contains(&OP_NONE) {
        return Err(PspfError::Build(
            "operation chain contains the 0x00 terminator".to_string(),
        ));
    }

    let mut packed = 0u64;
    for (i, &op) in operations.iter().enumerate() {
        packed |= u64::from(op) << (i * 8);
    }
    Ok(packed)
}

/// Unpack a 64-bit integer into the list of operations, in apply order.
pub fn unpack_operations(packed: u64) -> Vec<u8> {
    let mut operations = Vec::new();
    for i in 0..MAX_CHAIN_OPS {
        let op = ((packed >> (i * 8)) & 0xFF) as u8;
        if op == OP_NONE {
            break;
        }
        operations.push(op);
    }
    operations
}

/// Human-readable name of a single opcode
pub fn op_name(op: u8) -> &'static str {
    match op {
        OP_NONE => "none",
        OP_TAR => "tar",
        OP_GZIP => "gzip",
        OP_BZIP2 => "bzip2",
        OP_XZ => "xz",
        OP_ZSTD => "zstd",
        _ => "unknown",
    }
}

/// Render a chain in its symbolic metadata form ("tar.gz", "zstd", "raw", ...)
pub fn chain_to_string(operations: &[u8]) -> String {
    match operations {
        [] => "raw".to_string(),
        [OP_TAR] => "tar".to_string(),
        [OP_TAR, OP_GZIP] => "tar.gz".to_string(),
        [OP_TAR, OP_BZIP2] => "tar.bz2".to_string(),
        [OP_TAR, OP_XZ] => "tar.xz".to_string(),
        [OP_TAR, OP_ZSTD] => "tar.zst".to_string(),
        ops => ops
            .iter()
            .map(|&op| op_name(op))
            .collect::<Vec<_>>()
            .join("|"),
    }
}

/// Parse the symbolic form back into opcodes.
///
/// Accepts the common archive spellings ("tar.gz", "tgz", ...) and the
/// pipe-separated general form ("tar|zstd").
pub fn string_to_chain(spec: &str) -> Result<Vec<u8>> {
    let spec = spec.trim().to_lowercase();
    if spec.is_empty() || spec == "raw" || spec == "none" {
        return Ok(vec![]);
    }

    let named: Option<Vec<u8>> = match spec.as_str() {
        "tar" => Some(vec![OP_TAR]),
        "gzip" | "gz" => Some(vec![OP_GZIP]),
        "bzip2" | "bz2" => Some(vec![OP_BZIP2]),
        "xz" => Some(vec![OP_XZ]),
        "zstd" | "zst" => Some(vec![OP_ZSTD]),
        "tar.gz" | "tgz" => Some(vec![OP_TAR, OP_GZIP]),
        "tar.bz2" | "tbz2" => Some(vec![OP_TAR, OP_BZIP2]),
        "tar.xz" | "txz" => Some(vec![OP_TAR, OP_XZ]),
        "tar.zst" | "tzst" => Some(vec![OP_TAR, OP_ZSTD]),
        _ => None,
    };
    if let Some(ops) = named {
        return Ok(ops);
    }

    if spec.contains('|') {
        let mut operations = Vec::new();
        for part in spec.split('|') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let op = match part {
                "tar" => OP_TAR,
                "gzip" | "gz" => OP_GZIP,
                "bzip2" | "bz2" => OP_BZIP2,
                "xz" => OP_XZ,
                "zstd" | "zst" => OP_ZSTD,
                _ => {
                    return Err(PspfError::Config(format!(
                        "unknown operation {part:?} in chain {spec:?}"
                    )));
                }
            };
            operations.push(op);
        }
        if operations.len() > MAX_CHAIN_OPS {
            return Err(PspfError::Config(format!(
                "operation chain {spec:?} has more than {MAX_CHAIN_OPS} steps"
            )));
        }
        return Ok(operations);
    }

    Err(PspfError::Config(format!("unknown operation chain {spec:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_single_operation() {
        assert_eq!(pack_operations(&[OP_GZIP]).unwrap(), 0x0000_0000_0000_0010);
    }

    #[test]
    fn pack_tar_zstd_is_0x1b01() {
        let packed = pack_operations(&[OP_TAR, OP_ZSTD]).unwrap();
        assert_eq!(packed, 0x0000_0000_0000_1B01);
        assert_eq!(packed.to_le_bytes(), [0x01, 0x1B, 0, 0, 0, 0, 0, 0]);
        assert_eq!(unpack_operations(packed), vec![0x01, 0x1B]);
    }

    #[test]
    fn empty_chain_is_zero() {
        assert_eq!(pack_operations(&[]).unwrap(), 0);
        assert!(unpack_operations(0).is_empty());
    }

    #[test]
    fn round_trip_up_to_eight() {
        let ops = vec![OP_TAR, OP_GZIP, OP_BZIP2, OP_XZ, OP_ZSTD, OP_GZIP, OP_XZ, OP_TAR];
        let packed = pack_operations(&ops).unwrap();
        assert_eq!(unpack_operations(packed), ops);
    }

    #[test]
    fn nine_operations_is_an_error() {
        let ops = vec![OP_GZIP; 9];
        let err = pack_operations(&ops).unwrap_err();
        assert!(err.to_string().contains("maximum is 8"));
    }

    #[test]
    fn embedded_terminator_is_an_error() {
        assert!(pack_operations(&[OP_TAR, OP_NONE, OP_GZIP]).is_err());
    }

    #[test]
    fn symbolic_round_trip() {
        for spec in ["raw", "tar", "tar.gz", "tar.bz2", "tar.xz", "tar.zst", "gzip", "zstd"] {
            let ops = string_to_chain(spec).unwrap();
            let rendered = chain_to_string(&ops);
            assert_eq!(string_to_chain(&rendered).unwrap(), ops);
        }
        assert_eq!(string_to_chain("tgz").unwrap(), vec![OP_TAR, OP_GZIP]);
        assert_eq!(string_to_chain("tar|zstd").unwrap(), vec![OP_TAR, OP_ZSTD]);
        assert!(string_to_chain("rar").is_err());
    }
}
