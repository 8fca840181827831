//! Crash-safe file output.
//!
//! Checkpoints, processed dataset splits, sweep reports and test results all
//! go through these helpers so a killed run never leaves a half-written file
//! where a later job expects a complete one.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Sibling path the data is staged in: `checkpoint.json` -> `checkpoint.json.tmp`.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("out"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Write `data` to a staging sibling, then rename it over `path`.
/// Parent directories are created as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    ensure_parent(path)?;
    let staged = staging_path(path);
    std::fs::write(&staged, data)?;
    std::fs::rename(&staged, path)
}

/// Pretty-printed JSON through [`atomic_write`].
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, &json)
}

/// Copy `from` to `to` with the same staging guarantee as [`atomic_write`].
/// Returns the number of bytes copied.
pub fn copy_file(from: &Path, to: &Path) -> io::Result<u64> {
    ensure_parent(to)?;
    let staged = staging_path(to);
    let bytes = std::fs::copy(from, &staged)?;
    std::fs::rename(&staged, to)?;
    Ok(bytes)
}
