//! JSON → YAML conversion and persistence into the storage directory.
//!
//! ## `persist` — steps
//!
//! 1. Check that `save_as` is a single plain file name.
//! 2. Parse the content as JSON.
//! 3. Serialize it as YAML.
//! 4. Create the storage directory if needed.
//! 5. Write to a fresh temp file inside the storage directory.
//! 6. Rename it over `<storage>/<save_as>.yaml`.
//!
//! Every write gets its own temp file, so concurrent writers to one name
//! never share a partial file; the last rename wins.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::types::Outcome;
use crate::validator::INVALID_MESSAGE;

/// Extension given to every persisted file.
pub const NORMALIZED_EXTENSION: &str = "yaml";

/// Writes converted payloads under a single storage directory.
#[derive(Debug, Clone)]
pub struct Converter {
    storage_dir: PathBuf,
}

impl Converter {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Destination path for `save_as`, or an error if the name would land
    /// outside the storage directory.
    pub fn target_path(&self, save_as: &str) -> Result<PathBuf, CoreError> {
        check_save_as(save_as)?;
        Ok(self
            .storage_dir
            .join(format!("{save_as}.{NORMALIZED_EXTENSION}")))
    }

    /// Convert `content` to YAML and write it as `<save_as>.yaml`.
    ///
    /// Failures are reported as a failed [`Outcome`]; nothing propagates.
    pub fn persist(&self, content: &str, save_as: &str) -> Outcome {
        match self.write_converted(content, save_as) {
            Ok(path) => Outcome::ok(format!("Saved as {}", path.display())),
            Err(CoreError::Json(err)) => {
                tracing::debug!("not persisting '{save_as}': {err}");
                Outcome::fail(INVALID_MESSAGE)
            }
            Err(err) => {
                tracing::error!("failed to save '{save_as}': {err}");
                Outcome::fail(format!("Error saving file: {err}"))
            }
        }
    }

    pub(crate) fn write_converted(&self, content: &str, save_as: &str) -> Result<PathBuf, CoreError> {
        let path = self.target_path(save_as)?;
        let value: serde_json::Value = serde_json::from_str(content)?;
        let yaml = serde_yaml::to_string(&value)?;

        std::fs::create_dir_all(&self.storage_dir).map_err(|e| io_err(&self.storage_dir, e))?;

        // Dropped (and deleted) on any error below.
        let mut tmp = tempfile::Builder::new()
            .prefix(".meco-")
            .suffix(".tmp")
            .tempfile_in(&self.storage_dir)
            .map_err(|e| io_err(&self.storage_dir, e))?;
        tmp.write_all(yaml.as_bytes())
            .map_err(|e| io_err(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| io_err(&path, e.error))?;

        tracing::info!("saved: {}", path.display());
        Ok(path)
    }
}

/// Only a single normal path component is allowed.
fn check_save_as(save_as: &str) -> Result<(), CoreError> {
    let mut components = Path::new(save_as).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name == save_as => Ok(()),
        _ => Err(CoreError::InvalidSaveAs(save_as.to_string())),
    }
}
