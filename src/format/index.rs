// PSPF/2025 index block: fixed 8192-byte record after the launcher prefix.
// All integers little-endian. The self-checksum is CRC-32 over the whole
// block with the checksum field zeroed, so in-transit corruption is caught
// independently of the signature.

use super::constants::{
    FORMAT_VERSION, INDEX_MAGIC, INDEX_SIZE, MAX_SLOTS, SLOT_DESCRIPTOR_SIZE, SLOT_TABLE_OFFSET,
};
use super::slots::SlotDescriptor;
use crate::error::{PspfError, Result};

/// Parsed PSPF/2025 index block
#[derive(Clone, Debug)]
pub struct Index {
    pub format_version: u32,
    pub flags: u64,
    pub launcher_size: u64,
    pub metadata_offset: u64,
    pub metadata_size: u64,
    pub slot_table_offset: u64,
    pub slot_count: u32,
    pub self_crc32: u32,
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
    pub slots: Vec<SlotDescriptor>,
}

impl Index {
    /// Create an index with defaults for the current format version
    pub fn new() -> Self {
        Index {
            format_version: FORMAT_VERSION,
            flags: 0,
            launcher_size: 0,
            metadata_offset: 0,
            metadata_size: 0,
            slot_table_offset: SLOT_TABLE_OFFSET,
            slot_count: 0,
            self_crc32: 0,
            public_key: [0; 32],
            signature: [0; 64],
            slots: Vec::new(),
        }
    }

    /// Pack the index into its 8192-byte on-disk form.
    ///
    /// The CRC field is computed as a final step over the block with the
    /// field itself zeroed. Reserved regions are zero.
    pub fn pack(&self) -> Result<[u8; INDEX_SIZE]> {
        if self.slots.len() > MAX_SLOTS {
            return Err(PspfError::Build(format!(
                "too many slots: {} exceeds index capacity {}",
                self.slots.len(),
                MAX_SLOTS
            )));
        }

        let mut bytes = [0u8; INDEX_SIZE];
        bytes[0x00..0x04].copy_from_slice(INDEX_MAGIC);
        bytes[0x04..0x08].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[0x08..0x10].copy_from_slice(&self.flags.to_le_bytes());
        bytes[0x10..0x18].copy_from_slice(&self.launcher_size.to_le_bytes());
        bytes[0x18..0x20].copy_from_slice(&self.metadata_offset.to_le_bytes());
        bytes[0x20..0x28].copy_from_slice(&self.metadata_size.to_le_bytes());
        bytes[0x28..0x30].copy_from_slice(&self.slot_table_offset.to_le_bytes());
        bytes[0x30..0x34].copy_from_slice(&(self.slots.len() as u32).to_le_bytes());
        // 0x34..0x38 is the CRC field, filled below
        bytes[0x38..0x58].copy_from_slice(&self.public_key);
        bytes[0x58..0x98].copy_from_slice(&self.signature);

        let table = self.slot_table_offset as usize;
        for (i, slot) in self.slots.iter().enumerate() {
            let at = table + i * SLOT_DESCRIPTOR_SIZE;
            bytes[at..at + SLOT_DESCRIPTOR_SIZE].copy_from_slice(&slot.pack());
        }

        let crc = crc32fast::hash(&bytes);
        bytes[0x34..0x38].copy_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    /// Unpack and validate an index block.
    ///
    /// Rejects wrong magic, wrong version, and CRC mismatch before any field
    /// is trusted.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() != INDEX_SIZE {
            return Err(PspfError::format(format!(
                "index block is {} bytes, expected {INDEX_SIZE}",
                data.len()
            )));
        }

        if &data[0x00..0x04] != INDEX_MAGIC {
            return Err(PspfError::format(format!(
                "bad magic {:02x?}",
                &data[0x00..0x04]
            )));
        }

        let format_version = u32::from_le_bytes(data[0x04..0x08].try_into().unwrap_or_default());
        if format_version != FORMAT_VERSION {
            return Err(PspfError::format(format!(
                "unsupported format version {format_version:#010x}"
            )));
        }

        let stored_crc = u32::from_le_bytes(data[0x34..0x38].try_into().unwrap_or_default());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&data[..0x34]);
        hasher.update(&[0u8; 4]);
        hasher.update(&data[0x38..]);
        let computed_crc = hasher.finalize();
        if computed_crc != stored_crc {
            return Err(PspfError::format(format!(
                "index checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
            )));
        }

        let flags = u64::from_le_bytes(data[0x08..0x10].try_into().unwrap_or_default());
        let launcher_size = u64::from_le_bytes(data[0x10..0x18].try_into().unwrap_or_default());
        let metadata_offset = u64::from_le_bytes(data[0x18..0x20].try_into().unwrap_or_default());
        let metadata_size = u64::from_le_bytes(data[0x20..0x28].try_into().unwrap_or_default());
        let slot_table_offset =
            u64::from_le_bytes(data[0x28..0x30].try_into().unwrap_or_default());
        let slot_count = u32::from_le_bytes(data[0x30..0x34].try_into().unwrap_or_default());

        if slot_count as usize > MAX_SLOTS {
            return Err(PspfError::format(format!(
                "slot count {slot_count} exceeds index capacity {MAX_SLOTS}"
            )));
        }
        let table = slot_table_offset as usize;
        if table < 0x98
            || table
                .checked_add(slot_count as usize * SLOT_DESCRIPTOR_SIZE)
                .is_none_or(|end| end > INDEX_SIZE)
        {
            return Err(PspfError::format(format!(
                "slot table at {slot_table_offset:#x} does not fit in the index block"
            )));
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[0x38..0x58]);
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&data[0x58..0x98]);

        let mut slots = Vec::with_capacity(slot_count as usize);
        for i in 0..slot_count as usize {
            let at = table + i * SLOT_DESCRIPTOR_SIZE;
            let descriptor = SlotDescriptor::unpack(&data[at..at + SLOT_DESCRIPTOR_SIZE])?;
            slots.push(descriptor);
        }

        Ok(Index {
            format_version,
            flags,
            launcher_size,
            metadata_offset,
            metadata_size,
            slot_table_offset,
            slot_count,
            self_crc32: stored_crc,
            public_key,
            signature,
            slots,
        })
    }

    /// Absolute offset of the metadata end (= first possible slot byte)
    pub fn metadata_end(&self) -> u64 {
        self.metadata_offset + self.metadata_size
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::OP_GZIP;

    fn sample_index() -> Index {
        let mut index = Index::new();
        index.launcher_size = 3;
        index.metadata_offset = 3 + INDEX_SIZE as u64;
        index.metadata_size = 120;
        index.public_key = [7u8; 32];
        index.signature = [9u8; 64];
        let mut slot = SlotDescriptor::new(0, "app");
        slot.offset = index.metadata_end();
        slot.size = 64;
        slot.original_size = 256;
        slot.operations = u64::from(OP_GZIP);
        index.slots.push(slot);
        index
    }

    #[test]
    fn pack_unpack_round_trip() {
        let index = sample_index();
        let bytes = index.pack().unwrap();
        let parsed = Index::unpack(&bytes).unwrap();

        assert_eq!(parsed.format_version, FORMAT_VERSION);
        assert_eq!(parsed.launcher_size, 3);
        assert_eq!(parsed.metadata_offset, index.metadata_offset);
        assert_eq!(parsed.metadata_size, 120);
        assert_eq!(parsed.slot_count, 1);
        assert_eq!(parsed.public_key, [7u8; 32]);
        assert_eq!(parsed.signature, [9u8; 64]);
        assert_eq!(parsed.slots[0].size, 64);
        assert_eq!(parsed.slots[0].operations, u64::from(OP_GZIP));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample_index().pack().unwrap();
        bytes[0] = b'X';
        let err = Index::unpack(&bytes).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = sample_index().pack().unwrap();
        bytes[0x04] = 0xFF;
        // Refresh the CRC so the version check is what fires
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..0x34]);
        hasher.update(&[0u8; 4]);
        hasher.update(&bytes[0x38..]);
        let crc = hasher.finalize();
        bytes[0x34..0x38].copy_from_slice(&crc.to_le_bytes());

        let err = Index::unpack(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn corrupted_byte_fails_crc() {
        let mut bytes = sample_index().pack().unwrap();
        bytes[0x20] ^= 0x01;
        let err = Index::unpack(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn unused_tail_is_zero_padded() {
        let index = sample_index();
        let bytes = index.pack().unwrap();
        let tail_start = SLOT_TABLE_OFFSET as usize + SLOT_DESCRIPTOR_SIZE;
        assert!(bytes[tail_start..].iter().all(|&b| b == 0));
    }
}

// 📦🗃️🪄
