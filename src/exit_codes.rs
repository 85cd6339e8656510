//! Standard exit codes for PSPF binaries
//!
//! These exit codes are used by both builder and launcher to provide
//! consistent error reporting. The signature and lock-timeout codes are part
//! of the launcher's observable contract and must not change between
//! releases.

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Generic error (avoid using - be more specific)
pub const EXIT_ERROR: i32 = 1;

/// Invalid command-line usage
pub const EXIT_USAGE: i32 = 2;

/// Panic or unrecoverable error
pub const EXIT_PANIC: i32 = 101;

/// PSPF format error (invalid package structure, corrupt data)
pub const EXIT_FORMAT_ERROR: i32 = 102;

/// Extraction error (failed to extract slots, disk space, permissions)
pub const EXIT_EXTRACTION_ERROR: i32 = 103;

/// Execution error (failed to spawn process, missing interpreter)
pub const EXIT_EXECUTION_ERROR: i32 = 104;

/// I/O error (file not found, permission denied, disk error)
pub const EXIT_IO_ERROR: i32 = 106;

/// Signature or slot-checksum verification failed
pub const EXIT_SIGNATURE_ERROR: i32 = 107;

/// Build/packaging error (builder-specific)
pub const EXIT_BUILD_ERROR: i32 = 108;

/// Configuration error (invalid manifest, missing required fields)
pub const EXIT_CONFIG_ERROR: i32 = 109;

/// Timed out waiting for another process's extraction lock
pub const EXIT_LOCK_TIMEOUT: i32 = 111;
