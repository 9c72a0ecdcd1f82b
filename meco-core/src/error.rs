//! Error types for meco-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised inside the request pipeline before they are folded into an
/// [`Outcome`](crate::Outcome).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with the path it happened on.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Payload is not JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization failed.
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `save_as` would escape the storage directory or is empty.
    #[error("invalid save_as name '{0}'")]
    InvalidSaveAs(String),

    /// A `file_path` payload that is not valid UTF-8 text.
    #[error("file is not valid UTF-8 text: {path}")]
    NonUtf8 { path: PathBuf },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
