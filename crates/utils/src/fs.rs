use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicWriteError {
    #[error("target has no parent directory: {0}")]
    NoParent(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to persist temp file: {0}")]
    Persist(String),
}

const RENAME_RETRIES: usize = 3;

/// Write `content` to `path` atomically: stage into a temp file in the same
/// directory, fsync, then rename over the target. Readers never observe a
/// partially written file. The final rename is retried a few times before
/// the failure surfaces (transient contention on some filesystems).
pub fn atomic_write(path: &Path, content: &str) -> Result<(), AtomicWriteError> {
    atomic_write_bytes(path, content.as_bytes())
}

pub fn atomic_write_bytes(path: &Path, content: &[u8]) -> Result<(), AtomicWriteError> {
    let parent = path
        .parent()
        .ok_or_else(|| AtomicWriteError::NoParent(path.display().to_string()))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    let mut attempt = 0;
    loop {
        match tmp.persist(path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt >= RENAME_RETRIES {
                    return Err(AtomicWriteError::Persist(e.to_string()));
                }
                tracing::debug!(
                    "rename to {} failed (attempt {attempt}), retrying: {}",
                    path.display(),
                    e.error
                );
                tmp = e.file;
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        }
    }
}

/// Replace `target` with the fully staged directory at `staged`.
///
/// The previous target (if any) is moved aside first so a crash between the
/// two renames leaves either the old or the new tree in place, never a mix.
pub fn replace_dir(staged: &Path, target: &Path) -> Result<(), std::io::Error> {
    let backup = target.with_file_name(format!(
        ".{}.replaced",
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dir".to_string())
    ));

    if backup.exists() {
        fs::remove_dir_all(&backup)?;
    }
    if target.exists() {
        fs::rename(target, &backup)?;
    }

    match fs::rename(staged, target) {
        Ok(()) => {
            if backup.exists() {
                // Old tree is dead weight at this point; losing the cleanup
                // is harmless, so ignore errors.
                let _ = fs::remove_dir_all(&backup);
            }
            Ok(())
        }
        Err(e) => {
            if backup.exists() {
                let _ = fs::rename(&backup, target);
            }
            Err(e)
        }
    }
}

/// Recursively copy `src` into `dst`, creating `dst` if needed.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), std::io::Error> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
