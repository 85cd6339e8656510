//! Error taxonomy for the PSPF engine
//!
//! Every fallible operation in the crate funnels into [`PspfError`]. The
//! variants map one-to-one onto the exit codes in [`crate::exit_codes`] so
//! binaries can translate an error into a stable process status.

use std::path::Path;

/// Main error type for PSPF operations
#[derive(Debug, thiserror::Error)]
pub enum PspfError {
    /// Structural problem with the package file: bad magic, bad version,
    /// index checksum mismatch, missing trailer.
    #[error("FormatError: {0}")]
    Format(String),

    /// A stored slot's checksum does not match its descriptor.
    #[error("IntegrityError: {0}")]
    Integrity(String),

    /// Ed25519 signature verification failed.
    #[error("SignatureError: {0}")]
    Signature(String),

    /// Could not acquire the extraction lock within the timeout.
    #[error("LockTimeout: extraction lock held by PID {holder} after {waited_secs}s")]
    LockTimeout { holder: u32, waited_secs: u64 },

    /// Opcode failure, path traversal attempt, or I/O failure while
    /// extracting a slot.
    #[error("ExtractionError: {0}")]
    Extraction(String),

    /// Build-side failure: bad manifest, unstageable slot, key problems.
    #[error("BuildError: {0}")]
    Build(String),

    /// Invalid manifest or configuration input.
    #[error("ConfigError: {0}")]
    Config(String),

    /// Failure while preparing or spawning the payload command.
    #[error("LaunchError: {0}")]
    Launch(String),

    /// Underlying filesystem failure.
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JsonError: {0}")]
    Json(#[from] serde_json::Error),
}

impl PspfError {
    /// Build a `Format` error for an unexpected file shape.
    pub fn format(msg: impl Into<String>) -> Self {
        PspfError::Format(msg.into())
    }

    /// Build an `Extraction` error carrying the offending path.
    pub fn extraction_at(path: &Path, msg: impl std::fmt::Display) -> Self {
        PspfError::Extraction(format!("{}: {msg}", path.display()))
    }

    /// Map this error onto its stable process exit code.
    pub fn exit_code(&self) -> i32 {
        use crate::exit_codes as codes;
        match self {
            PspfError::Format(_) => codes::EXIT_FORMAT_ERROR,
            PspfError::Integrity(_) | PspfError::Signature(_) => codes::EXIT_SIGNATURE_ERROR,
            PspfError::LockTimeout { .. } => codes::EXIT_LOCK_TIMEOUT,
            PspfError::Extraction(_) => codes::EXIT_EXTRACTION_ERROR,
            PspfError::Build(_) => codes::EXIT_BUILD_ERROR,
            PspfError::Config(_) => codes::EXIT_CONFIG_ERROR,
            PspfError::Launch(_) => codes::EXIT_EXECUTION_ERROR,
            PspfError::Io(_) => codes::EXIT_IO_ERROR,
            PspfError::Json(_) => codes::EXIT_FORMAT_ERROR,
        }
    }
}

/// Result type for PSPF operations
pub type Result<T> = std::result::Result<T, PspfError>;
