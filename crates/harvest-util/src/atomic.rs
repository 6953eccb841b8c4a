//! Atomic file writes: temp file in the target directory, fsync, rename.
//!
//! Queue state, learning stores, and every generated artifact go through
//! this path so a crash mid-write never leaves a torn file.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Atomically write `content` to `path`, creating parent directories as
/// needed. Line endings are normalized to LF.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(normalized.as_bytes())
        .with_context(|| "failed to write content to temporary file")?;
    temp_file
        .as_file()
        .sync_all()
        .with_context(|| "failed to fsync temporary file")?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("failed to atomically write file: {path}"))?;

    Ok(())
}
