//! Deterministic tar archiving and guarded extraction
//!
//! Forward: POSIX ustar archive of a source directory (or single file) with
//! lexicographic entry ordering. In deterministic mode every entry gets a
//! zero mtime, uid/gid 0 and empty owner names, so the same tree always
//! produces the same bytes. Reverse: extraction that rejects entries whose
//! path would resolve outside the target directory.

use crate::error::{PspfError, Result};
use log::{debug, trace};
use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

/// Build a tar archive of `source` in memory.
pub fn create_archive(source: &Path, deterministic: bool) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    if source.is_dir() {
        let mut entries = collect_entries(source)?;
        entries.sort();
        for relative in &entries {
            append_path(&mut builder, source, relative, deterministic)?;
        }
    } else if source.is_file() {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PspfError::Build(format!("unusable file name: {}", source.display())))?;
        append_path(&mut builder, source.parent().unwrap_or(source), Path::new(name), deterministic)?;
    } else {
        return Err(PspfError::Build(format!(
            "slot source {} does not exist",
            source.display()
        )));
    }

    builder
        .into_inner()
        .map_err(|e| PspfError::Build(format!("tar archiving failed: {e}")))
}

/// Recursively collect entry paths relative to the archive root.
fn collect_entries(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|e| PspfError::Build(format!("path outside archive root: {e}")))?
                .to_path_buf();
            out.push(relative);
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    walk(root, root, &mut entries)?;
    Ok(entries)
}

/// Append one filesystem entry under its relative archive path.
fn append_path(
    builder: &mut tar::Builder<Vec<u8>>,
    root: &Path,
    relative: &Path,
    deterministic: bool,
) -> Result<()> {
    let full = root.join(relative);
    let meta = fs::symlink_metadata(&full)?;

    let mut header = tar::Header::new_ustar();
    if deterministic {
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
    } else {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        header.set_mtime(mtime);
    }

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::MetadataExt;
        meta.mode() & 0o7777
    };
    #[cfg(not(unix))]
    let mode = if meta.is_dir() { 0o755 } else { 0o644 };

    if meta.file_type().is_symlink() {
        let target = fs::read_link(&full)?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(mode);
        builder
            .append_link(&mut header, relative, &target)
            .map_err(|e| PspfError::Build(format!("tar symlink {}: {e}", relative.display())))?;
    } else if meta.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(mode);
        builder
            .append_data(&mut header, relative, std::io::empty())
            .map_err(|e| PspfError::Build(format!("tar dir {}: {e}", relative.display())))?;
    } else {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(meta.len());
        header.set_mode(mode);
        let file = fs::File::open(&full)?;
        builder
            .append_data(&mut header, relative, file)
            .map_err(|e| PspfError::Build(format!("tar file {}: {e}", relative.display())))?;
    }

    trace!("archived {}", relative.display());
    Ok(())
}

/// Extract a tar archive into `target`, refusing escaping paths.
///
/// Two guards run per entry: the raw path may not contain `..` or be
/// absolute, and the destination's parent must canonicalize to a location
/// under the target root. The second catches writes routed through a
/// symlink created by an earlier entry.
pub fn extract_archive(data: &[u8], target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let target_real = fs::canonicalize(target)?;
    let mut archive = tar::Archive::new(Cursor::new(data));
    archive.set_preserve_permissions(cfg!(unix));

    for entry in archive
        .entries()
        .map_err(|e| PspfError::Extraction(format!("unreadable tar archive: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| PspfError::Extraction(format!("bad tar entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| PspfError::Extraction(format!("bad tar entry path: {e}")))?
            .into_owned();

        check_contained(&path)?;

        let dest = target_real.join(&path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
            let parent_real = fs::canonicalize(parent)
                .map_err(|e| PspfError::extraction_at(parent, e))?;
            if !parent_real.starts_with(&target_real) {
                return Err(PspfError::Extraction(format!(
                    "path traversal attempt: {} resolves outside the target",
                    path.display()
                )));
            }
        }
        entry
            .unpack(&dest)
            .map_err(|e| PspfError::extraction_at(&dest, e))?;
    }

    debug!("extracted tar archive into {}", target.display());
    Ok(())
}

/// Reject absolute paths and any `..` component.
fn check_contained(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PspfError::Extraction(format!(
                    "path traversal attempt: {}",
                    path.display()
                )));
            }
            Component::Normal(_) | Component::CurDir => {}
        }
    }
    Ok(())
}
