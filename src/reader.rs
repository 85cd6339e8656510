//! Package reader
//!
//! Memory-maps a package file, locates the magic trailer and the index
//! block, and hands out validated views of the metadata and slot regions.
//!
//! The index sits immediately after the launcher prefix, whose length is
//! only recorded inside the index itself. The reader therefore scans for
//! the `PSPF` magic and accepts the first candidate whose version matches,
//! whose CRC-32 self-checksum holds, and whose `launcher_size` field equals
//! the candidate's own file offset. A stray `PSPF` string inside the
//! launcher fails at least one of those checks.

use crate::error::{PspfError, Result};
use crate::format::constants::{INDEX_MAGIC, INDEX_SIZE, TRAILER, TRAILER_SIZE};
use crate::format::index::Index;
use crate::format::metadata::{Metadata, decompress_metadata};
use log::{debug, trace};
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Check that a file ends with the magic trailer.
pub fn locate_trailer(data: &[u8]) -> Result<()> {
    if data.len() < TRAILER_SIZE {
        return Err(PspfError::format("file shorter than the trailer"));
    }
    if &data[data.len() - TRAILER_SIZE..] != TRAILER {
        return Err(PspfError::format("magic trailer missing at end of file"));
    }
    Ok(())
}

/// Reader over a single package file
pub struct Reader {
    path: PathBuf,
    mmap: Mmap,
    index: Index,
    metadata: Option<Metadata>,
    canonical_metadata: Option<Vec<u8>>,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("file_size", &self.mmap.len())
            .field("slot_count", &self.index.slot_count)
            .finish()
    }
}

impl Reader {
    /// Open a package: map it, find the trailer and index, check layout
    /// invariants. No signature or checksum policy is applied here.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PspfError::format(format!("cannot open {}: {e}", path.display())))?;
        // The package is read-only after build; a shared map is safe.
        #[allow(unsafe_code)]
        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|e| PspfError::format(format!("cannot map {}: {e}", path.display())))?
        };

        locate_trailer(&mmap)?;
        let index = Self::locate_index(&mmap)?;
        Self::check_layout(&index, mmap.len() as u64)?;

        debug!(
            "opened package {} ({} bytes, {} slots)",
            path.display(),
            mmap.len(),
            index.slot_count
        );

        Ok(Reader {
            path: path.to_path_buf(),
            mmap,
            index,
            metadata: None,
            canonical_metadata: None,
        })
    }

    /// Scan for the index block and parse it.
    fn locate_index(data: &[u8]) -> Result<Index> {
        if data.len() < INDEX_SIZE + TRAILER_SIZE {
            return Err(PspfError::format(format!(
                "file is {} bytes, too small to hold an index block",
                data.len()
            )));
        }

        let last_candidate = data.len() - INDEX_SIZE - TRAILER_SIZE;
        let mut offset = 0usize;
        while offset <= last_candidate {
            if data[offset..offset + 4] != INDEX_MAGIC[..] {
                offset += 1;
                continue;
            }
            trace!("index magic candidate at {offset:#x}");
            match Index::unpack(&data[offset..offset + INDEX_SIZE]) {
                Ok(index) if index.launcher_size == offset as u64 => return Ok(index),
                Ok(_) | Err(_) => {
                    offset += 1;
                }
            }
        }

        Err(PspfError::format("no valid index block found"))
    }

    /// Layout invariants: regions ordered, inside the file, non-overlapping.
    fn check_layout(index: &Index, file_size: u64) -> Result<()> {
        let index_end = index.launcher_size + INDEX_SIZE as u64;
        if index.metadata_offset < index_end {
            return Err(PspfError::format(
                "metadata region overlaps the index block",
            ));
        }
        let slot_region_end = file_size - TRAILER_SIZE as u64;
        if index.metadata_end() > slot_region_end {
            return Err(PspfError::format("metadata region runs past the trailer"));
        }

        let mut ranges: Vec<(u64, u64)> = index
            .slots
            .iter()
            .filter(|slot| slot.size > 0)
            .map(|slot| (slot.offset, slot.offset + slot.size))
            .collect();
        ranges.sort_unstable();
        let mut previous_end = index.metadata_end();
        for (start, end) in ranges {
            if start < previous_end {
                return Err(PspfError::format(format!(
                    "slot range {start:#x}..{end:#x} overlaps earlier data"
                )));
            }
            if end > slot_region_end {
                return Err(PspfError::format(format!(
                    "slot range {start:#x}..{end:#x} runs past the trailer"
                )));
            }
            previous_end = end;
        }
        Ok(())
    }

    /// The parsed index block.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Package file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// The gzipped metadata block as stored.
    pub fn raw_metadata(&self) -> &[u8] {
        let start = self.index.metadata_offset as usize;
        let end = start + self.index.metadata_size as usize;
        &self.mmap[start..end]
    }

    /// Uncompressed canonical metadata bytes (the signed payload).
    pub fn canonical_metadata(&mut self) -> Result<&[u8]> {
        if self.canonical_metadata.is_none() {
            self.canonical_metadata = Some(decompress_metadata(self.raw_metadata())?);
        }
        Ok(self.canonical_metadata.as_deref().unwrap_or_default())
    }

    /// Parsed metadata document.
    pub fn metadata(&mut self) -> Result<&Metadata> {
        if self.metadata.is_none() {
            let canonical = self.canonical_metadata()?.to_vec();
            self.metadata = Some(Metadata::from_bytes(&canonical)?);
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| PspfError::format("metadata unavailable"))
    }

    /// Stored bytes of slot `i`.
    pub fn slot_bytes(&self, i: usize) -> Result<&[u8]> {
        let slot = self
            .index
            .slots
            .get(i)
            .ok_or_else(|| PspfError::format(format!("slot index {i} out of range")))?;
        let start = slot.offset as usize;
        let end = start + slot.size as usize;
        if end > self.mmap.len() {
            return Err(PspfError::format(format!(
                "slot {i} range {start:#x}..{end:#x} outside the file"
            )));
        }
        Ok(&self.mmap[start..end])
    }

    /// Compare slot `i`'s stored bytes against its descriptor checksum.
    pub fn slot_checksum_ok(&self, i: usize) -> Result<bool> {
        let slot = &self.index.slots[i];
        let digest = Sha256::digest(self.slot_bytes(i)?);
        let stored = u64::from_le_bytes(digest[..8].try_into().unwrap_or_default());
        Ok(stored == slot.checksum)
    }

    /// SHA-256 over the entire package file.
    pub fn package_sha256(&self) -> [u8; 32] {
        Sha256::digest(&self.mmap[..]).into()
    }
}


// 📦📖🪄
