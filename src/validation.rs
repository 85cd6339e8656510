//! Validation levels controlling how strictly packages are checked

use std::env;

/// Default validation level when `FLAVOR_VALIDATION` is unset or invalid
pub const DEFAULT_VALIDATION_LEVEL: ValidationLevel = ValidationLevel::Standard;

/// ValidationLevel represents different levels of security validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    /// Full security checks, fail on any issue (most secure)
    Strict,
    /// Signature and slot checksums mandatory; cache mismatches re-extract
    Standard,
    /// Signature mandatory, slot checksum mismatches logged only
    Relaxed,
    /// Only format checks (magic, version, CRC, trailer)
    Minimal,
    /// Skip all validation (testing only, NOT RECOMMENDED)
    None,
}

impl ValidationLevel {
    /// Parse validation level from string (case insensitive)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "standard" => Some(Self::Standard),
            "relaxed" => Some(Self::Relaxed),
            "minimal" => Some(Self::Minimal),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Convert validation level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Strict => "strict",
            ValidationLevel::Standard => "standard",
            ValidationLevel::Relaxed => "relaxed",
            ValidationLevel::Minimal => "minimal",
            ValidationLevel::None => "none",
        }
    }

    /// Whether a failed signature check aborts the launch.
    pub fn signature_mandatory(&self) -> bool {
        matches!(
            self,
            ValidationLevel::Strict | ValidationLevel::Standard | ValidationLevel::Relaxed
        )
    }

    /// Whether a slot checksum mismatch aborts the launch.
    pub fn slot_checksums_mandatory(&self) -> bool {
        matches!(self, ValidationLevel::Strict | ValidationLevel::Standard)
    }

    /// Whether a cached-workenv checksum mismatch is fatal (rather than
    /// triggering a re-extraction).
    pub fn cache_mismatch_fatal(&self) -> bool {
        matches!(self, ValidationLevel::Strict)
    }

    /// Whether any verification at all runs.
    pub fn verifies_anything(&self) -> bool {
        !matches!(self, ValidationLevel::None)
    }
}

/// Get the current validation level from `FLAVOR_VALIDATION` or the default
pub fn validation_level() -> ValidationLevel {
    if let Ok(val) = env::var("FLAVOR_VALIDATION") {
        if let Some(level) = ValidationLevel::parse(&val) {
            return level;
        }
        log::warn!("unrecognized FLAVOR_VALIDATION value {val:?}, using default");
    }
    DEFAULT_VALIDATION_LEVEL
}
