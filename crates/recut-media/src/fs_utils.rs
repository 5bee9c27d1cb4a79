//! Filesystem helpers for intermediates and final outputs.

use std::io::Write;
use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first. On EXDEV the file is copied next to `dst` and then
/// renamed into place, so `dst` never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, falling back to copy+delete"
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Copy a file into place without exposing a partial destination.
pub async fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    ensure_parent(dst).await?;

    let staging = dst.with_extension("partial");
    if let Err(e) = fs::copy(src, &staging).await {
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }
    fs::rename(&staging, dst).await?;
    Ok(())
}

/// Write `bytes` to `path` through a temporary file in the same directory.
pub async fn write_atomic(path: impl AsRef<Path>, bytes: Vec<u8>) -> MediaResult<()> {
    let path = path.as_ref().to_path_buf();
    ensure_parent(&path).await?;

    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| MediaError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| MediaError::internal(format!("write task failed: {e}")))?
}

/// Remove a directory tree, logging instead of failing.
pub async fn remove_dir_best_effort(dir: impl AsRef<Path>) {
    let dir = dir.as_ref();
    if let Err(e) = fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove directory");
        }
    }
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    copy_file(src, dst).await?;

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            src = %src.display(),
            error = %e,
            "Failed to remove source after cross-device move"
        );
    }
    Ok(())
}
