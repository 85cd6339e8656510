//! Package launcher runtime
//!
//! One execution walks a linear sequence of fallible steps:
//!
//! ```text
//! locate self -> read trailer + index -> verify -> compute workenv id
//!   -> cache check / atomic extract -> prepare env -> exec payload
//! ```
//!
//! Errors terminate the process with a taxonomic exit code before the exec;
//! after the exec the payload owns the process entirely.

pub mod command;

use crate::api::LaunchOptions;
use crate::cache::{self, CacheStatus, extract};
use crate::error::{PspfError, Result};
use crate::platform::{cache_root, is_env_false};
use crate::reader::Reader;
use crate::validation::validation_level;
use crate::verify::verify_reader;
use log::{debug, info};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

/// PID of a spawned payload, for signal forwarding
static CHILD_PID: AtomicU32 = AtomicU32::new(0);

/// Launch a package: verify, materialize the workenv, run the payload.
///
/// In exec mode (POSIX default) this replaces the process and only returns
/// on failure. In spawn mode it returns the child's exit code.
pub fn launch(package_path: &Path, args: &[String], options: &LaunchOptions) -> Result<i32> {
    debug!("📖 launching package {}", package_path.display());

    let mut reader = Reader::open(package_path)?;

    let level = validation_level();
    verify_reader(&mut reader, level)?;

    let metadata = reader.metadata()?.clone();
    info!(
        "📦 {} v{}",
        metadata.package.name, metadata.package.version
    );

    let package_sha256 = reader.package_sha256();
    let root = options.cache_root.clone().unwrap_or_else(cache_root);
    let paths = cache::paths_for(
        &root,
        &metadata.package.name,
        &metadata.package.version,
        &package_sha256,
    );
    debug!("workenv id {}", paths.name());

    if cache::cache_status(&paths, &package_sha256) == CacheStatus::ChecksumMismatch
        && level.cache_mismatch_fatal()
    {
        return Err(PspfError::Integrity(format!(
            "cached workenv {} belongs to a different package",
            paths.name()
        )));
    }

    if is_env_false("FLAVOR_WORKENV_CACHE") {
        info!("FLAVOR_WORKENV_CACHE is falsy, forcing re-extraction");
        cache::invalidate(&paths)?;
    }

    extract::install_signal_cleanup();
    let workenv = extract::ensure_workenv(&mut reader, &paths, &package_sha256)?;

    let (executable, cmd_args, env_map) =
        command::prepare_command(&metadata, &workenv, package_path, args)?;
    run_payload(&executable, &cmd_args, &env_map, package_path)
}

/// Exec or spawn the payload, per platform and `FLAVOR_EXEC_MODE`.
fn run_payload(
    executable: &str,
    args: &[String],
    env_map: &std::collections::HashMap<String, String>,
    package_path: &Path,
) -> Result<i32> {
    let spawn_mode = std::env::var("FLAVOR_EXEC_MODE")
        .map(|v| v.eq_ignore_ascii_case("spawn"))
        .unwrap_or(false);

    let mut cmd = Command::new(executable);
    cmd.args(args);
    cmd.env_clear();
    cmd.envs(env_map);

    #[cfg(unix)]
    if !spawn_mode {
        use std::os::unix::process::CommandExt;

        // Binary payloads get the package name as argv[0]; scripts keep
        // their interpreter-resolved name.
        if !is_script(executable) {
            if let Some(name) = package_path.file_name().and_then(|n| n.to_str()) {
                cmd.arg0(name);
            }
        }

        info!("🚀 exec {executable}");
        let error = cmd.exec();
        return Err(PspfError::Launch(format!("exec {executable}: {error}")));
    }

    #[cfg(not(unix))]
    let _ = (spawn_mode, package_path);
    info!("🚀 spawn {executable}");
    let mut child = cmd
        .spawn()
        .map_err(|e| PspfError::Launch(format!("spawn {executable}: {e}")))?;
    CHILD_PID.store(child.id(), Ordering::SeqCst);
    forward_signals_to_child();

    let status = child
        .wait()
        .map_err(|e| PspfError::Launch(format!("wait for {executable}: {e}")))?;
    CHILD_PID.store(0, Ordering::SeqCst);
    Ok(status.code().unwrap_or(1))
}

/// Relay SIGINT/SIGTERM to the spawned payload.
#[cfg(unix)]
fn forward_signals_to_child() {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) else {
        return;
    };
    std::thread::spawn(move || {
        for signal in signals.forever() {
            let pid = CHILD_PID.load(Ordering::SeqCst);
            if pid != 0 {
                #[allow(unsafe_code)]
                unsafe {
                    libc::kill(pid as libc::pid_t, signal);
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn forward_signals_to_child() {}

/// Does the file start with a `#!` interpreter line?
#[cfg(unix)]
fn is_script(executable: &str) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(executable) else {
        return false;
    };
    let mut header = [0u8; 2];
    file.read_exact(&mut header).is_ok() && &header == b"#!"
}
