//! Extraction lock management
//!
//! One lock file per workenv, created with exclusive-create semantics and
//! stamped with the owner's PID. A lock whose owner is no longer alive is
//! reclaimed together with that owner's scratch directory. A live owner is
//! waited on with polling and capped backoff, never forced.

use super::WorkenvPaths;
use crate::error::{PspfError, Result};
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::time::{Duration, Instant};

/// Reclaim attempts before concluding somebody else owns the lock
const MAX_RECLAIM_ATTEMPTS: u32 = 2;

/// Check whether a process with the given PID is alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) probes for existence; EPERM still means the PID is live.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    // No cheap liveness probe; treat unknown owners as dead so stale locks
    // from crashed extractors never wedge the cache.
    false
}

/// Exclusive extraction lock; removing the file releases it.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: std::path::PathBuf,
    released: bool,
}

impl LockGuard {
    /// Remove the lock file.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.lock_path) {
                debug!("could not remove lock file: {e}");
            } else {
                debug!("🔓 released extraction lock");
            }
            self.released = true;
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Try once to take the lock.
///
/// Returns `Ok(Some(guard))` on success and `Ok(None)` when a live process
/// holds it. Stale locks (dead owner, unreadable PID) are reclaimed along
/// with the dead owner's scratch directory; repeated reclaim failures
/// escalate to an error.
pub fn try_acquire(paths: &WorkenvPaths) -> Result<Option<LockGuard>> {
    fs::create_dir_all(paths.extract_dir())?;
    let lock_path = paths.lock_file();

    for attempt in 0..=MAX_RECLAIM_ATTEMPTS {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!("🔒 acquired extraction lock (PID {})", std::process::id());
                return Ok(Some(LockGuard {
                    lock_path,
                    released: false,
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_owner(paths) {
                    Some(pid) if is_process_alive(pid) => {
                        debug!("lock held by live PID {pid}");
                        return Ok(None);
                    }
                    Some(pid) => {
                        info!("🧹 reclaiming lock from dead PID {pid}");
                        let _ = fs::remove_dir_all(paths.scratch_for(pid));
                        if fs::remove_file(&lock_path).is_err() && attempt == MAX_RECLAIM_ATTEMPTS {
                            return Err(PspfError::Extraction(
                                "could not reclaim stale extraction lock".to_string(),
                            ));
                        }
                    }
                    None => {
                        info!("🧹 removing unreadable lock file");
                        if fs::remove_file(&lock_path).is_err() && attempt == MAX_RECLAIM_ATTEMPTS {
                            return Err(PspfError::Extraction(
                                "could not remove invalid extraction lock".to_string(),
                            ));
                        }
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(PspfError::Extraction(
        "another extractor holds the lock".to_string(),
    ))
}

/// Read the PID recorded in the lock file, if parseable.
pub fn read_owner(paths: &WorkenvPaths) -> Option<u32> {
    fs::read_to_string(paths.lock_file())
        .ok()
        .and_then(|text| text.trim().parse().ok())
}

/// Wait until the lock file disappears, with capped backoff.
///
/// Exceeding `timeout` is a terminal `LockTimeout`.
pub fn wait_for_release(paths: &WorkenvPaths, timeout: Duration) -> Result<()> {
    let lock_path = paths.lock_file();
    let started = Instant::now();
    let mut delay = Duration::from_millis(100);

    while lock_path.exists() {
        if started.elapsed() >= timeout {
            return Err(PspfError::LockTimeout {
                holder: read_owner(paths).unwrap_or(0),
                waited_secs: timeout.as_secs(),
            });
        }
        if let Some(pid) = read_owner(paths) {
            if !is_process_alive(pid) {
                debug!("lock owner {pid} died while we waited");
                return Ok(());
            }
        }
        std::thread::sleep(delay);
        delay = (delay * 2).min(Duration::from_secs(2));
    }

    debug!("extraction lock released after {:?}", started.elapsed());
    Ok(())
}

/// Remove scratch directories left behind by dead extractors.
pub fn cleanup_stale_scratch(paths: &WorkenvPaths) {
    let tmp = paths.tmp();
    let Ok(entries) = fs::read_dir(&tmp) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        if !is_process_alive(pid) {
            info!("🧹 removing stale scratch from dead PID {pid}");
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                debug!("could not remove stale scratch {name}: {e}");
            }
        }
    }
}
