//! Version information for PSPF binaries

/// Current engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (set at compile time when available)
pub const GIT_COMMIT: Option<&str> = option_env!("GIT_COMMIT");

/// Get full version string with optional build information
pub fn full_version() -> String {
    match GIT_COMMIT {
        Some(commit) => format!("{VERSION} ({})", &commit[..8.min(commit.len())]),
        None => VERSION.to_string(),
    }
}
