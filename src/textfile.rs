//! Locked, crash-safe access to the flat text files.
//!
//! Readers and writers coordinate through an `fs2` advisory lock on a sidecar
//! `<file>.lock`, so the data file itself can be replaced by rename. Writers
//! stage the new contents in a temp file in the same directory and rename it
//! over the target; a crash leaves either the old file or the new one.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{Result, TunerError};

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock(path: &Path) -> Result<File> {
    let lock = lock_path(path);
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock)
        .map_err(|e| TunerError::io(&lock, e))
}

/// Read the whole file under a shared lock. Returns None if it does not exist.
pub fn read_locked(path: &Path) -> Result<Option<String>> {
    let lock = open_lock(path)?;
    lock.lock_shared().map_err(|e| TunerError::io(lock_path(path), e))?;
    let content = match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(TunerError::io(path, e)),
    };
    // lock released when `lock` is dropped
    Ok(content)
}

/// Read-modify-write under an exclusive lock.
///
/// `edit` receives the current contents (None if the file is missing) and
/// returns the replacement. If `edit` fails nothing is written.
pub fn update_locked<F>(path: &Path, edit: F) -> Result<()>
where
    F: FnOnce(Option<&str>) -> Result<String>,
{
    let lock = open_lock(path)?;
    lock.lock_exclusive().map_err(|e| TunerError::io(lock_path(path), e))?;
    let current = match std::fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(TunerError::io(path, e)),
    };
    let replacement = edit(current.as_deref())?;
    replace_atomic(path, &replacement)
}

fn replace_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| TunerError::io(dir, e))?;
    staged
        .write_all(contents.as_bytes())
        .and_then(|_| staged.flush())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| TunerError::io(staged.path(), e))?;
    staged.persist(path).map_err(|e| TunerError::io(path, e.error))?;
    log::debug!(target: "textfile", "Replaced {} ({} bytes)", path.display(), contents.len());
    Ok(())
}
