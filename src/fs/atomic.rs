//! Crash-safe file replacement.
//!
//! Content goes to a uniquely named temp file next to the target, is synced,
//! and is then renamed over the target. Readers see either the old or the new
//! file, never a partial one. Source and target share a directory, so the
//! rename stays on one filesystem.

use crate::error::{FlowError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Atomically replace `path` with `content`, creating parent directories.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            FlowError::UserError(format!(
                "failed to create directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp = temp_path(path)?;
    if let Err(e) = write_synced(&temp, content) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        FlowError::UserError(format!(
            "failed to atomically replace '{}': {}",
            path.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// String convenience wrapper around [`atomic_write`].
pub fn atomic_write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

fn temp_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            FlowError::UserError(format!("invalid file path '{}'", target.display()))
        })?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let temp = format!(".{}.{}.tmp", name, &suffix[..8]);
    Ok(match target.parent() {
        Some(parent) => parent.join(temp),
        None => PathBuf::from(temp),
    })
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        FlowError::UserError(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;
    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            FlowError::UserError(format!(
                "failed to write temporary file '{}': {}",
                path.display(),
                e
            ))
        })
}
