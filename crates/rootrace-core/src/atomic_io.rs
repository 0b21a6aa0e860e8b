use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

static TEMP_FILE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn validate_destination(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok(parent_dir.to_path_buf())
}

// Unique per process and per call so two writers in one directory never share a temp file.
fn temp_path_for(parent_dir: &Path, path: &Path) -> PathBuf {
    let temp_name = format!(
        ".{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("rootrace-store"),
        std::process::id(),
        current_unix_timestamp_ms(),
        TEMP_FILE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    );
    parent_dir.join(temp_name)
}

/// Writes text using a temp file + rename so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent_dir = validate_destination(path)?;
    std::fs::create_dir_all(&parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_path = temp_path_for(&parent_dir, path);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    if let Err(error) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Async counterpart of [`write_text_atomic`] for callers already on a Tokio runtime.
pub async fn write_text_atomic_async(path: &Path, content: &str) -> Result<()> {
    let parent_dir = validate_destination(path)?;
    tokio::fs::create_dir_all(&parent_dir)
        .await
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_path = temp_path_for(&parent_dir, path);
    tokio::fs::write(&temp_path, content)
        .await
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(error).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}
