// Slot descriptors: 64-byte fixed records in the index slot table.

use super::constants::{DEFAULT_FILE_PERMS, SLOT_DESCRIPTOR_SIZE};
use crate::error::{PspfError, Result};

/// Role of a slot's content
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    Code = 0,
    Data = 1,
    Config = 2,
    Media = 3,
}

impl Purpose {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Purpose::Code),
            1 => Some(Purpose::Data),
            2 => Some(Purpose::Config),
            3 => Some(Purpose::Media),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Purpose::Code),
            "data" => Some(Purpose::Data),
            "config" => Some(Purpose::Config),
            "media" => Some(Purpose::Media),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Code => "code",
            Purpose::Data => "data",
            Purpose::Config => "config",
            Purpose::Media => "media",
        }
    }
}

/// When a slot's content is materialized and how long it is kept
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Init = 0,
    Startup = 1,
    Runtime = 2,
    Shutdown = 3,
    Cache = 4,
    Temp = 5,
    Lazy = 6,
    Eager = 7,
    Dev = 8,
    Config = 9,
    Platform = 10,
}

impl Lifecycle {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Lifecycle::Init),
            1 => Some(Lifecycle::Startup),
            2 => Some(Lifecycle::Runtime),
            3 => Some(Lifecycle::Shutdown),
            4 => Some(Lifecycle::Cache),
            5 => Some(Lifecycle::Temp),
            6 => Some(Lifecycle::Lazy),
            7 => Some(Lifecycle::Eager),
            8 => Some(Lifecycle::Dev),
            9 => Some(Lifecycle::Config),
            10 => Some(Lifecycle::Platform),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Lifecycle::Init),
            "startup" => Some(Lifecycle::Startup),
            "runtime" => Some(Lifecycle::Runtime),
            "shutdown" => Some(Lifecycle::Shutdown),
            "cache" => Some(Lifecycle::Cache),
            "temp" => Some(Lifecycle::Temp),
            "lazy" => Some(Lifecycle::Lazy),
            "eager" => Some(Lifecycle::Eager),
            "dev" => Some(Lifecycle::Dev),
            "config" => Some(Lifecycle::Config),
            "platform" => Some(Lifecycle::Platform),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Init => "init",
            Lifecycle::Startup => "startup",
            Lifecycle::Runtime => "runtime",
            Lifecycle::Shutdown => "shutdown",
            Lifecycle::Cache => "cache",
            Lifecycle::Temp => "temp",
            Lifecycle::Lazy => "lazy",
            Lifecycle::Eager => "eager",
            Lifecycle::Dev => "dev",
            Lifecycle::Config => "config",
            Lifecycle::Platform => "platform",
        }
    }
}

/// Platform a slot is restricted to
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlatformReq {
    Any = 0,
    Linux = 1,
    Darwin = 2,
    Windows = 3,
}

impl PlatformReq {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PlatformReq::Any),
            1 => Some(PlatformReq::Linux),
            2 => Some(PlatformReq::Darwin),
            3 => Some(PlatformReq::Windows),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "any" => Some(PlatformReq::Any),
            "linux" => Some(PlatformReq::Linux),
            "darwin" => Some(PlatformReq::Darwin),
            "windows" => Some(PlatformReq::Windows),
            _ => None,
        }
    }

    /// Whether this requirement is satisfied by the named OS
    pub fn matches_os(&self, os: &str) -> bool {
        match self {
            PlatformReq::Any => true,
            PlatformReq::Linux => os == "linux",
            PlatformReq::Darwin => os == "darwin",
            PlatformReq::Windows => os == "windows",
        }
    }
}

/// Slot descriptor - 64 bytes total, little-endian throughout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub id: u64,
    pub name_hash: u64,     // First 8 bytes of SHA-256(slot name)
    pub offset: u64,        // Absolute byte offset within the package
    pub size: u64,          // Stored size (after all operations)
    pub original_size: u64, // Size before any operation was applied
    pub operations: u64,    // Packed operation chain
    pub checksum: u64,      // First 8 bytes of SHA-256(stored bytes)
    pub purpose: u8,
    pub lifecycle: u8,
    pub priority: u8,     // Cache eviction priority
    pub platform_req: u8, // 0=any, 1=linux, 2=darwin, 3=windows
    pub permissions: u16, // POSIX mode bits
}

impl SlotDescriptor {
    /// Create a descriptor with defaults, hashing the slot name
    pub fn new(id: u64, name: &str) -> Self {
        SlotDescriptor {
            id,
            name_hash: Self::hash_name(name),
            offset: 0,
            size: 0,
            original_size: 0,
            operations: 0,
            checksum: 0,
            purpose: Purpose::Data as u8,
            lifecycle: Lifecycle::Runtime as u8,
            priority: 0,
            platform_req: PlatformReq::Any as u8,
            permissions: DEFAULT_FILE_PERMS,
        }
    }

    /// Hash a slot name: first 8 bytes of SHA-256, little-endian
    pub fn hash_name(name: &str) -> u64 {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(name.as_bytes());
        u64::from_le_bytes(digest[..8].try_into().unwrap_or_default())
    }

    /// Pack descriptor to its 64-byte on-disk form
    pub fn pack(&self) -> [u8; SLOT_DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; SLOT_DESCRIPTOR_SIZE];
        bytes[0x00..0x08].copy_from_slice(&self.id.to_le_bytes());
        bytes[0x08..0x10].copy_from_slice(&self.name_hash.to_le_bytes());
        bytes[0x10..0x18].copy_from_slice(&self.offset.to_le_bytes());
        bytes[0x18..0x20].copy_from_slice(&self.size.to_le_bytes());
        bytes[0x20..0x28].copy_from_slice(&self.original_size.to_le_bytes());
        bytes[0x28..0x30].copy_from_slice(&self.operations.to_le_bytes());
        bytes[0x30..0x38].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[0x38] = self.purpose;
        bytes[0x39] = self.lifecycle;
        bytes[0x3A] = self.priority;
        bytes[0x3B] = self.platform_req;
        // 0x3C..0x3E reserved, zero
        bytes[0x3E..0x40].copy_from_slice(&self.permissions.to_le_bytes());
        bytes
    }

    /// Unpack a descriptor from its 64-byte on-disk form
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() != SLOT_DESCRIPTOR_SIZE {
            return Err(PspfError::format(format!(
                "slot descriptor is {} bytes, expected {SLOT_DESCRIPTOR_SIZE}",
                data.len()
            )));
        }

        Ok(SlotDescriptor {
            id: u64::from_le_bytes(data[0x00..0x08].try_into().unwrap_or_default()),
            name_hash: u64::from_le_bytes(data[0x08..0x10].try_into().unwrap_or_default()),
            offset: u64::from_le_bytes(data[0x10..0x18].try_into().unwrap_or_default()),
            size: u64::from_le_bytes(data[0x18..0x20].try_into().unwrap_or_default()),
            original_size: u64::from_le_bytes(data[0x20..0x28].try_into().unwrap_or_default()),
            operations: u64::from_le_bytes(data[0x28..0x30].try_into().unwrap_or_default()),
            checksum: u64::from_le_bytes(data[0x30..0x38].try_into().unwrap_or_default()),
            purpose: data[0x38],
            lifecycle: data[0x39],
            priority: data[0x3A],
            platform_req: data[0x3B],
            permissions: u16::from_le_bytes(data[0x3E..0x40].try_into().unwrap_or_default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trip() {
        let mut slot = SlotDescriptor::new(3, "runtime");
        slot.offset = 0x2040;
        slot.size = 1234;
        slot.original_size = 9999;
        slot.operations = 0x1B01;
        slot.checksum = 0xDEAD_BEEF_CAFE_F00D;
        slot.purpose = Purpose::Code as u8;
        slot.lifecycle = Lifecycle::Startup as u8;
        slot.priority = 200;
        slot.platform_req = PlatformReq::Linux as u8;
        slot.permissions = 0o755;

        let bytes = slot.pack();
        let parsed = SlotDescriptor::unpack(&bytes).unwrap();
        assert_eq!(parsed, slot);
        // Reserved bytes stay zero
        assert_eq!(&bytes[0x3C..0x3E], &[0, 0]);
    }

    #[test]
    fn name_hash_is_sha256_prefix() {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(b"app");
        let expected = u64::from_le_bytes(digest[..8].try_into().unwrap());
        assert_eq!(SlotDescriptor::hash_name("app"), expected);
        assert_ne!(SlotDescriptor::hash_name("app"), SlotDescriptor::hash_name("app2"));
    }

    #[test]
    fn purpose_and_lifecycle_codes() {
        assert_eq!(Purpose::Code as u8, 0);
        assert_eq!(Purpose::Data as u8, 1);
        assert_eq!(Purpose::parse("media"), Some(Purpose::Media));
        assert_eq!(Lifecycle::parse("platform"), Some(Lifecycle::Platform));
        assert_eq!(Lifecycle::Platform as u8, 10);
        assert_eq!(Lifecycle::from_byte(11), None);
    }

    #[test]
    fn platform_requirement_matching() {
        assert!(PlatformReq::Any.matches_os("linux"));
        assert!(PlatformReq::Linux.matches_os("linux"));
        assert!(!PlatformReq::Windows.matches_os("linux"));
        assert!(PlatformReq::Darwin.matches_os("darwin"));
    }
}

// 📦🎰🪄
