//! Size-based rotation for the detached service's log files.
//!
//! The service writes `meco.log` / `meco-err.log` through descriptors opened
//! in append mode by the launcher, so the live file is copied aside and then
//! truncated in place rather than renamed:
//!   meco.log → meco.log.1 → meco.log.2 → … → meco.log.5

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated backup files to keep.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if its size reaches `max_bytes`.
///
/// Returns `true` if rotation occurred. Missing files are skipped.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }

    // Copy then truncate: the writer keeps its descriptor and, being in
    // append mode, continues at the new end of file.
    fs::copy(log_path, numbered_path(log_path, 1))?;
    fs::OpenOptions::new().write(true).open(log_path)?.set_len(0)?;

    Ok(true)
}

/// Rotate both service logs under `runtime_dir`.
///
/// Errors for one file are logged and do not block the other.
pub fn rotate_logs(runtime_dir: &Path) {
    let stdout_log = crate::paths::stdout_log_path(runtime_dir);
    let stderr_log = crate::paths::stderr_log_path(runtime_dir);

    for log_path in [&stdout_log, &stderr_log] {
        match rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed"),
        }
    }
}

/// Path of the `n`-th rotated copy of `base` (e.g. `meco.log.2`).
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::STDOUT_LOG);
    base.with_file_name(format!("{name}.{n}"))
}
