//! Atomic extraction into the workenv cache
//!
//! Guarantees that workenv content is either absent, a complete
//! checksum-valid extraction, or in progress under a live lock owner. The
//! sequence per winning extractor:
//!
//! 1. extract every slot, in declared order, into `tmp/<pid>/`
//! 2. rewrite shebangs so interpreter paths name the final content dir
//! 3. rename the scratch directory onto the content directory
//! 4. persist `package.checksum`, `index.json`, `psp.json`
//! 5. touch the completion marker (last observable write)
//! 6. release the lock
//!
//! A crash between 3 and 5 leaves an unmarked workenv that the next run
//! treats as incomplete and re-extracts.

use super::lock::{self, LockGuard};
use super::{CacheStatus, WorkenvPaths, cache_status, invalidate};
use crate::error::{PspfError, Result};
use crate::format::chain::unpack_operations;
use crate::format::constants::{DEFAULT_DIR_PERMS, DEFAULT_LOCK_TIMEOUT_SECS, OP_TAR};
use crate::format::slots::PlatformReq;
use crate::platform::os_name;
use crate::reader::Reader;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Paths removed if a signal interrupts extraction: (scratch, lock)
static SIGNAL_CLEANUP: Mutex<Option<(PathBuf, PathBuf)>> = Mutex::new(None);

/// Install the SIGINT/SIGTERM handler that tears down an in-flight
/// extraction before exiting. Call once, before any extraction starts.
#[cfg(unix)]
pub fn install_signal_cleanup() {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) else {
        return;
    };
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            if let Ok(guard) = SIGNAL_CLEANUP.lock() {
                if let Some((scratch, lock_path)) = guard.as_ref() {
                    let _ = fs::remove_dir_all(scratch);
                    let _ = fs::remove_file(lock_path);
                }
            }
            std::process::exit(crate::exit_codes::EXIT_ERROR);
        }
    });
}

#[cfg(not(unix))]
pub fn install_signal_cleanup() {}

fn arm_signal_cleanup(scratch: &Path, lock_path: &Path) {
    if let Ok(mut guard) = SIGNAL_CLEANUP.lock() {
        *guard = Some((scratch.to_path_buf(), lock_path.to_path_buf()));
    }
}

fn disarm_signal_cleanup() {
    if let Ok(mut guard) = SIGNAL_CLEANUP.lock() {
        *guard = None;
    }
}

/// Lock-wait timeout, overridable via `FLAVOR_LOCK_TIMEOUT` seconds.
pub fn lock_timeout() -> Duration {
    let secs = std::env::var("FLAVOR_LOCK_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Ensure a complete workenv exists for the package, extracting if needed.
///
/// Returns the content directory. Concurrent callers for the same package
/// either reuse the completed cache or wait for the winning extractor; two
/// extractors never write to the same content directory.
pub fn ensure_workenv(
    reader: &mut Reader,
    paths: &WorkenvPaths,
    package_sha256: &[u8; 32],
) -> Result<PathBuf> {
    lock::cleanup_stale_scratch(paths);

    loop {
        match cache_status(paths, package_sha256) {
            CacheStatus::Valid => {
                debug!("cache hit for workenv {}", paths.name());
                return Ok(paths.content());
            }
            CacheStatus::ChecksumMismatch => {
                warn!("cached workenv {} was built from a different package", paths.name());
            }
            CacheStatus::Incomplete => {}
        }

        match lock::try_acquire(paths)? {
            Some(guard) => {
                // Somebody may have finished between our check and the lock.
                if cache_status(paths, package_sha256) == CacheStatus::Valid {
                    guard.release();
                    return Ok(paths.content());
                }
                return extract_locked(reader, paths, package_sha256, guard);
            }
            None => {
                info!("⏳ another process is extracting, waiting");
                lock::wait_for_release(paths, lock_timeout())?;
                // Loop: re-check the cache, then retry the lock.
            }
        }
    }
}

/// The winning extractor's path: scratch, commit, persist, mark, release.
fn extract_locked(
    reader: &mut Reader,
    paths: &WorkenvPaths,
    package_sha256: &[u8; 32],
    guard: LockGuard,
) -> Result<PathBuf> {
    let scratch = paths.scratch_for(std::process::id());
    arm_signal_cleanup(&scratch, &paths.lock_file());

    let result = (|| -> Result<PathBuf> {
        invalidate(paths).map_err(|e| {
            PspfError::Extraction(format!("cannot clear stale workenv: {e}"))
        })?;

        fs::create_dir_all(&scratch)?;
        set_dir_perms(&scratch);

        extract_all_slots(reader, &scratch)?;
        rewrite_shebangs(&scratch, &scratch, &paths.content())?;
        commit_scratch(&scratch, &paths.content())?;
        persist_instance_state(reader, paths, package_sha256)?;

        // Completion marker is the last observable write.
        fs::write(paths.complete_file(), b"")?;
        Ok(paths.content())
    })();

    disarm_signal_cleanup();

    match result {
        Ok(content) => {
            guard.release();
            info!("✅ workenv {} ready at {}", paths.name(), content.display());
            Ok(content)
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&scratch);
            guard.release();
            Err(e)
        }
    }
}

/// Extract every slot, in declared order, into the scratch directory.
fn extract_all_slots(reader: &mut Reader, scratch: &Path) -> Result<()> {
    let metadata = reader.metadata()?.clone();
    let slot_count = reader.index().slots.len();

    for i in 0..slot_count {
        let descriptor = reader.index().slots[i];
        let info = metadata.slots.get(i).ok_or_else(|| {
            PspfError::Extraction(format!("slot {i} missing from metadata document"))
        })?;

        let platform = PlatformReq::from_byte(descriptor.platform_req).ok_or_else(|| {
            PspfError::Extraction(format!(
                "slot {:?}: unknown platform requirement {}",
                info.name, descriptor.platform_req
            ))
        })?;
        if !platform.matches_os(os_name()) {
            debug!("skipping slot {:?}: platform {:?} not {}", info.name, platform, os_name());
            continue;
        }

        info!("📤 extracting slot {i}: {}", info.name);
        let ops = unpack_operations(descriptor.operations);
        let stored = reader.slot_bytes(i)?.to_vec();

        let target = slot_target(scratch, &info.extract_to, &info.name, &ops);
        crate::pipeline::reverse_chain(&stored, &ops, &target)
            .map_err(|e| PspfError::Extraction(format!("slot {:?}: {e}", info.name)))?;

        // Single-file slots carry their mode in the descriptor.
        #[cfg(unix)]
        if !ops.contains(&OP_TAR) && descriptor.permissions != 0 {
            use std::os::unix::fs::PermissionsExt;
            let mode = u32::from(descriptor.permissions);
            if let Err(e) = fs::set_permissions(&target, fs::Permissions::from_mode(mode)) {
                warn!("could not set mode {mode:o} on {}: {e}", target.display());
            }
        }
    }

    Ok(())
}

/// Resolve a slot's extraction target inside the scratch directory.
fn slot_target(scratch: &Path, extract_to: &str, name: &str, ops: &[u8]) -> PathBuf {
    let relative = extract_to.trim_matches('/');
    if relative.is_empty() {
        if ops.contains(&OP_TAR) {
            scratch.to_path_buf()
        } else {
            scratch.join(name)
        }
    } else {
        scratch.join(relative)
    }
}

/// Rewrite `#!` interpreter lines that reference the scratch path.
fn rewrite_shebangs(dir: &Path, scratch: &Path, final_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            rewrite_shebangs(&path, scratch, final_dir)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let content = fs::read(&path)?;
        if !content.starts_with(b"#!") {
            continue;
        }
        let line_end = content.iter().position(|&b| b == b'\n').unwrap_or(content.len());
        let first_line = String::from_utf8_lossy(&content[..line_end]).into_owned();
        let scratch_str = scratch.to_string_lossy();
        if !first_line.contains(scratch_str.as_ref()) {
            continue;
        }

        let new_line = first_line.replace(scratch_str.as_ref(), &final_dir.to_string_lossy());
        let mut rewritten = new_line.into_bytes();
        rewritten.extend_from_slice(&content[line_end..]);

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            fs::metadata(&path)?.permissions().mode()
        };
        fs::write(&path, rewritten)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        }
        debug!("rewrote shebang in {}", path.display());
    }
    Ok(())
}

/// Rename scratch onto the content directory, copying across devices.
fn commit_scratch(scratch: &Path, content: &Path) -> Result<()> {
    if content.exists() {
        fs::remove_dir_all(content)?;
    }
    if let Some(parent) = content.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(scratch, content) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Cross-device renames cannot succeed; copy then remove.
            warn!("rename failed ({e}), falling back to copy");
            copy_dir_all(scratch, content)?;
            fs::remove_dir_all(scratch)?;
            Ok(())
        }
    }
}

/// Recursive directory copy preserving POSIX modes.
fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Serializable index summary for `instance/index.json`.
#[derive(Debug, Serialize)]
struct IndexSummary {
    format_version: String,
    launcher_size: u64,
    metadata_offset: u64,
    metadata_size: u64,
    slot_count: u32,
    index_crc32: String,
    public_key: String,
}

/// Write checksum, index summary and decoded metadata for inspection.
fn persist_instance_state(
    reader: &mut Reader,
    paths: &WorkenvPaths,
    package_sha256: &[u8; 32],
) -> Result<()> {
    fs::create_dir_all(paths.instance())?;
    fs::write(paths.checksum_file(), hex::encode(package_sha256))?;

    let index = reader.index();
    let summary = IndexSummary {
        format_version: format!("{:#010x}", index.format_version),
        launcher_size: index.launcher_size,
        metadata_offset: index.metadata_offset,
        metadata_size: index.metadata_size,
        slot_count: index.slot_count,
        index_crc32: format!("{:08x}", index.self_crc32),
        public_key: hex::encode(index.public_key),
    };
    fs::write(paths.index_file(), serde_json::to_string_pretty(&summary)?)?;

    let metadata = reader.metadata()?;
    let psp_path = paths.psp_metadata_file();
    if let Some(parent) = psp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&psp_path, serde_json::to_string_pretty(metadata)?)?;

    debug!("persisted instance state for {}", paths.name());
    Ok(())
}

fn set_dir_perms(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(u32::from(DEFAULT_DIR_PERMS)));
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BuildOptions;
    use crate::cache::paths_for;

    /// Build a hello package and open a reader on it.
    fn hello_reader(dir: &Path) -> (PathBuf, Reader) {
        fs::create_dir_all(dir.join("app/bin")).unwrap();
        fs::write(dir.join("app/run.sh"), b"#!/bin/sh\necho HELLO\n").unwrap();
        fs::write(dir.join("app/bin/tool"), b"tool-bytes").unwrap();
        let manifest = dir.join("manifest.json");
        fs::write(
            &manifest,
            r#"{
                "package": {"name": "hello", "version": "1.0.0"},
                "execution": {"command": "{workenv}/run.sh"},
                "slots": [
                    {"name": "app", "source": "app", "operations": "tar.gz"},
                    {"name": "notes", "source": "app/run.sh", "extract_to": "notes/run.txt",
                     "operations": "zstd", "purpose": "data", "permissions": "0600"}
                ]
            }"#,
        )
        .unwrap();
        let launcher = dir.join("launcher.bin");
        fs::write(&launcher, b"\x7FEL").unwrap();

        let package = dir.join("hello.psp");
        let options = BuildOptions {
            launcher_bin: Some(launcher),
            key_seed: Some("s1".to_string()),
            ..Default::default()
        };
        crate::builder::build(&manifest, &package, &options).unwrap();
        let reader = Reader::open(&package).unwrap();
        (package, reader)
    }

    #[test]
    fn extraction_creates_a_complete_workenv() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (_package, mut reader) = hello_reader(dir.path());

        let checksum = reader.package_sha256();
        let paths = paths_for(cache.path(), "hello", "1.0.0", &checksum);
        let content = ensure_workenv(&mut reader, &paths, &checksum).unwrap();

        assert_eq!(content, paths.content());
        assert_eq!(
            fs::read(content.join("run.sh")).unwrap(),
            b"#!/bin/sh\necho HELLO\n"
        );
        assert_eq!(fs::read(content.join("bin/tool")).unwrap(), b"tool-bytes");
        assert_eq!(
            fs::read(content.join("notes/run.txt")).unwrap(),
            b"#!/bin/sh\necho HELLO\n"
        );
        assert!(paths.complete_file().exists());
        assert_eq!(
            fs::read_to_string(paths.checksum_file()).unwrap(),
            hex::encode(checksum)
        );
        assert!(paths.index_file().exists());
        assert!(paths.psp_metadata_file().exists());
        // No lock or scratch left behind
        assert!(!paths.lock_file().exists());
        assert!(!paths.scratch_for(std::process::id()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn single_file_slot_gets_descriptor_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (_package, mut reader) = hello_reader(dir.path());
        let checksum = reader.package_sha256();
        let paths = paths_for(cache.path(), "hello", "1.0.0", &checksum);
        let content = ensure_workenv(&mut reader, &paths, &checksum).unwrap();

        let mode = fs::metadata(content.join("notes/run.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn second_call_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (_package, mut reader) = hello_reader(dir.path());
        let checksum = reader.package_sha256();
        let paths = paths_for(cache.path(), "hello", "1.0.0", &checksum);

        ensure_workenv(&mut reader, &paths, &checksum).unwrap();
        let marker_mtime = fs::metadata(paths.complete_file()).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        ensure_workenv(&mut reader, &paths, &checksum).unwrap();
        let marker_mtime_after = fs::metadata(paths.complete_file()).unwrap().modified().unwrap();
        assert_eq!(marker_mtime, marker_mtime_after, "cache hit must not re-extract");
    }

    #[test]
    fn stale_lock_and_scratch_are_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (_package, mut reader) = hello_reader(dir.path());
        let checksum = reader.package_sha256();
        let paths = paths_for(cache.path(), "hello", "1.0.0", &checksum);

        // Simulate a dead extractor: lock + scratch, no completion marker
        const DEAD_PID: u32 = 999_999_998;
        fs::create_dir_all(paths.extract_dir()).unwrap();
        fs::write(paths.lock_file(), format!("{DEAD_PID}\n")).unwrap();
        fs::create_dir_all(paths.scratch_for(DEAD_PID)).unwrap();
        fs::write(paths.scratch_for(DEAD_PID).join("junk"), b"partial").unwrap();

        let content = ensure_workenv(&mut reader, &paths, &checksum).unwrap();
        assert!(content.join("run.sh").exists());
        assert!(!paths.scratch_for(DEAD_PID).exists());
        assert!(paths.complete_file().exists());
    }

    #[test]
    fn checksum_mismatch_triggers_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (_package, mut reader) = hello_reader(dir.path());
        let checksum = reader.package_sha256();
        let paths = paths_for(cache.path(), "hello", "1.0.0", &checksum);

        ensure_workenv(&mut reader, &paths, &checksum).unwrap();
        // Corrupt the stored checksum, as if a different package produced it
        fs::write(paths.checksum_file(), "00".repeat(32)).unwrap();

        let content = ensure_workenv(&mut reader, &paths, &checksum).unwrap();
        assert!(content.join("run.sh").exists());
        assert_eq!(
            fs::read_to_string(paths.checksum_file()).unwrap(),
            hex::encode(checksum)
        );
    }

    #[test]
    fn failed_extraction_leaves_no_partial_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let (package, reader) = hello_reader(dir.path());
        let checksum = reader.package_sha256();

        // Corrupt the first slot's stored bytes so the gzip step fails
        let slot_offset = reader.index().slots[0].offset as usize;
        drop(reader);
        let mut bytes = fs::read(&package).unwrap();
        bytes[slot_offset..slot_offset + 4].copy_from_slice(b"XXXX");
        fs::write(&package, &bytes).unwrap();

        let mut reader = Reader::open(&package).unwrap();
        let paths = paths_for(cache.path(), "hello", "1.0.0", &checksum);
        let err = ensure_workenv(&mut reader, &paths, &checksum).unwrap_err();
        assert!(matches!(err, PspfError::Extraction(_)));

        assert!(!paths.content().exists());
        assert!(!paths.complete_file().exists());
        assert!(!paths.lock_file().exists());
        assert!(!paths.scratch_for(std::process::id()).exists());
    }

    #[test]
    fn shebang_rewriting_points_at_the_final_directory() {
        let scratch_root = tempfile::tempdir().unwrap();
        let scratch = scratch_root.path().join("tmp/123");
        fs::create_dir_all(scratch.join("bin")).unwrap();
        let script = scratch.join("bin/app");
        fs::write(
            &script,
            format!("#!{}/bin/python3\nprint('hi')\n", scratch.display()),
        )
        .unwrap();
        fs::write(scratch.join("bin/binary"), b"\x7FELF not a script").unwrap();

        let final_dir = Path::new("/cache/abcd");
        rewrite_shebangs(&scratch, &scratch, final_dir).unwrap();

        let rewritten = fs::read_to_string(&script).unwrap();
        assert!(rewritten.starts_with("#!/cache/abcd/bin/python3\n"));
        assert!(rewritten.ends_with("print('hi')\n"));
        assert_eq!(
            fs::read(scratch.join("bin/binary")).unwrap(),
            b"\x7FELF not a script"
        );
    }
}
