//! Platform helpers: cache root, platform naming, self-path resolution

use crate::error::{PspfError, Result};
use std::env;
use std::path::PathBuf;

/// Get normalized OS name ("linux", "darwin", "windows", ...)
pub fn os_name() -> &'static str {
    match env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Get normalized architecture name ("amd64", "arm64", ...)
pub fn arch_name() -> &'static str {
    match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Get normalized platform string in format 'os_arch'
///
/// Returns strings like:
/// - "darwin_arm64" for macOS ARM64
/// - "linux_amd64" for Linux x86_64
/// - "windows_amd64" for Windows x86_64
pub fn platform_string() -> String {
    format!("{}_{}", os_name(), arch_name())
}

/// Resolve the cache root for workenvs.
///
/// `FLAVOR_CACHE` overrides everything. Otherwise XDG conventions are used on
/// POSIX (`$XDG_CACHE_HOME/flavor/workenv`, falling back to
/// `~/.cache/flavor/workenv`) and `%LOCALAPPDATA%\flavor\workenv` on Windows.
pub fn cache_root() -> PathBuf {
    if let Ok(dir) = env::var("FLAVOR_CACHE") {
        return PathBuf::from(dir);
    }

    if let Ok(xdg_cache) = env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("flavor").join("workenv");
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".cache/flavor/workenv");
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("flavor").join("workenv");
        }
    }

    env::temp_dir().join("flavor").join("workenv")
}

/// Resolve the running executable to its real path.
///
/// Uses the OS query (`/proc/self/exe`, `_NSGetExecutablePath`,
/// `GetModuleFileName` via `std::env::current_exe`) and then resolves
/// symlinks, so the same physical package hashes identically regardless of
/// the invocation name.
pub fn self_exe_path() -> Result<PathBuf> {
    let exe = env::current_exe()
        .map_err(|e| PspfError::Launch(format!("cannot resolve own executable path: {e}")))?;
    Ok(std::fs::canonicalize(&exe).unwrap_or(exe))
}

/// Check if an environment variable is set to a falsy value
/// ("0", "false", "off", "no", case insensitive)
pub fn is_env_false(key: &str) -> bool {
    match env::var(key) {
        Ok(val) => {
            let val = val.to_lowercase();
            matches!(val.as_str(), "0" | "false" | "off" | "no")
        }
        Err(_) => false,
    }
}
