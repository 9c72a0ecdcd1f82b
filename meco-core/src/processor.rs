//! The `Start` request pipeline.
//!
//! A request moves through three decisions:
//!
//! 1. resolve the payload to text (or reject the request),
//! 2. pick the plan from `save_as` / `dry_run`,
//! 3. run the plan's validate / persist steps in order, stopping at the first
//!    failed step.
//!
//! Every path ends in an [`Outcome`]; [`Processor::handle`] folds any
//! remaining error into a generic failure.

use std::borrow::Cow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::converter::Converter;
use crate::error::{io_err, CoreError};
use crate::types::{Outcome, Payload, ResourceDescriptor};
use crate::validator::validate;

pub const MISSING_PAYLOAD_MESSAGE: &str = "No file_path or file_content provided.";
pub const PROCESSED_MESSAGE: &str = "File content processed successfully.";
pub const DRY_RUN_MESSAGE: &str = "File content validated (dry run).";

/// What to do with resolved content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan<'a> {
    /// No `save_as`: validate only, nothing is written.
    Validate { dry_run: bool },
    /// `save_as` without dry run: write first, then validate.
    PersistThenValidate { save_as: &'a str },
    /// `save_as` with dry run: validate first, write only valid content.
    ValidateThenPersist { save_as: &'a str },
}

impl<'a> Plan<'a> {
    fn for_descriptor(descriptor: &'a ResourceDescriptor) -> Self {
        match (descriptor.save_as.as_deref(), descriptor.dry_run) {
            (None, dry_run) => Plan::Validate { dry_run },
            (Some(save_as), false) => Plan::PersistThenValidate { save_as },
            (Some(save_as), true) => Plan::ValidateThenPersist { save_as },
        }
    }
}

/// Payload resolution result.
enum Resolved<'a> {
    Content(Cow<'a, str>),
    Rejected(Outcome),
}

/// Runs `Start` requests against one storage directory.
///
/// Holds no per-request state, so one instance is shared by all workers.
#[derive(Debug, Clone)]
pub struct Processor {
    converter: Converter,
}

impl Processor {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            converter: Converter::new(storage_dir),
        }
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Process a request. Never fails: errors become a failed [`Outcome`].
    pub fn handle(&self, descriptor: &ResourceDescriptor) -> Outcome {
        let outcome = match self.process(descriptor) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("unexpected error while processing request: {err}");
                Outcome::unexpected(err)
            }
        };
        if outcome.success {
            tracing::info!("request succeeded: {}", outcome.message);
        } else {
            tracing::warn!("request failed: {}", outcome.message);
        }
        outcome
    }

    /// Process a request, surfacing faults outside the expected failure
    /// modes as `Err`.
    pub fn process(&self, descriptor: &ResourceDescriptor) -> Result<Outcome, CoreError> {
        let content = match resolve(descriptor.payload.as_ref())? {
            Resolved::Content(content) => content,
            Resolved::Rejected(outcome) => return Ok(outcome),
        };
        tracing::debug!("processing content: {}", preview(&content));

        let outcome = match Plan::for_descriptor(descriptor) {
            Plan::Validate { dry_run } => {
                let validated = validate(&content);
                if !validated.success {
                    return Ok(validated);
                }
                Outcome::ok(if dry_run {
                    DRY_RUN_MESSAGE
                } else {
                    PROCESSED_MESSAGE
                })
            }
            Plan::PersistThenValidate { save_as } => {
                // Best effort: a file written here stays written even when
                // validation below fails.
                let saved = self.converter.persist(&content, save_as);
                if !saved.success {
                    return Ok(saved);
                }
                let validated = validate(&content);
                if !validated.success {
                    return Ok(validated);
                }
                Outcome::ok(format!("{PROCESSED_MESSAGE} {}", saved.message))
            }
            Plan::ValidateThenPersist { save_as } => {
                let validated = validate(&content);
                if !validated.success {
                    return Ok(validated);
                }
                // Dry run still writes; only the wording differs.
                let saved = self.converter.persist(&content, save_as);
                if !saved.success {
                    return Ok(saved);
                }
                Outcome::ok(format!("{DRY_RUN_MESSAGE} {}", saved.message))
            }
        };
        Ok(outcome)
    }
}

fn resolve(payload: Option<&Payload>) -> Result<Resolved<'_>, CoreError> {
    match payload {
        Some(Payload::FilePath(path)) => {
            tracing::info!("request names a file path: {}", path.display());
            read_payload_file(path)
        }
        Some(Payload::FileContent(content)) => {
            tracing::info!("request carries inline content ({} bytes)", content.len());
            Ok(Resolved::Content(Cow::Borrowed(content)))
        }
        None => {
            tracing::error!("request missing both file_path and file_content");
            Ok(Resolved::Rejected(Outcome::fail(MISSING_PAYLOAD_MESSAGE)))
        }
    }
}

fn read_payload_file(path: &Path) -> Result<Resolved<'static>, CoreError> {
    let missing = || Resolved::Rejected(Outcome::fail(format!("File does not exist: {}", path.display())));

    if !path.is_file() {
        return Ok(missing());
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            return Ok(missing())
        }
        Err(err) => return Err(io_err(path, err)),
    };
    let content = String::from_utf8(bytes).map_err(|_| CoreError::NonUtf8 {
        path: path.to_path_buf(),
    })?;
    Ok(Resolved::Content(Cow::Owned(content)))
}

fn preview(content: &str) -> Cow<'_, str> {
    match content.char_indices().nth(50) {
        Some((idx, _)) => Cow::Owned(format!("{}...", &content[..idx])),
        None => Cow::Borrowed(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::INVALID_MESSAGE;
    use tempfile::TempDir;

    fn processor(root: &TempDir) -> Processor {
        Processor::new(root.path().join("uploads"))
    }

    #[test]
    fn plan_follows_save_as_and_dry_run() {
        let plain = ResourceDescriptor::from_content("{}");
        assert_eq!(Plan::for_descriptor(&plain), Plan::Validate { dry_run: false });

        let saved = ResourceDescriptor::from_content("{}").save_as("x");
        assert_eq!(
            Plan::for_descriptor(&saved),
            Plan::PersistThenValidate { save_as: "x" }
        );

        let dry = ResourceDescriptor::from_content("{}").save_as("x").dry_run(true);
        assert_eq!(
            Plan::for_descriptor(&dry),
            Plan::ValidateThenPersist { save_as: "x" }
        );
    }

    #[test]
    fn missing_payload_is_rejected() {
        let root = TempDir::new().expect("tempdir");
        let descriptor = ResourceDescriptor {
            payload: None,
            save_as: Some("x".into()),
            dry_run: true,
        };

        let outcome = processor(&root).handle(&descriptor);

        assert_eq!(outcome, Outcome::fail(MISSING_PAYLOAD_MESSAGE));
        assert!(!root.path().join("uploads").exists());
    }

    #[test]
    fn missing_file_path_is_rejected_and_nothing_written() {
        let root = TempDir::new().expect("tempdir");
        let path = root.path().join("absent.json");
        let descriptor = ResourceDescriptor::from_path(&path).save_as("x");

        let outcome = processor(&root).handle(&descriptor);

        assert!(!outcome.success);
        assert_eq!(outcome.message, format!("File does not exist: {}", path.display()));
        assert!(!root.path().join("uploads").exists());
    }

    #[test]
    fn directory_as_file_path_is_rejected() {
        let root = TempDir::new().expect("tempdir");
        let outcome = processor(&root).handle(&ResourceDescriptor::from_path(root.path()));
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("File does not exist: "));
    }

    #[test]
    fn file_path_content_is_validated() {
        let root = TempDir::new().expect("tempdir");
        let path = root.path().join("descriptor.json");
        std::fs::write(&path, r#"{"satellites": 12}"#).expect("write");

        let outcome = processor(&root).handle(&ResourceDescriptor::from_path(&path));

        assert_eq!(outcome, Outcome::ok(PROCESSED_MESSAGE));
    }

    #[test]
    fn file_path_with_save_as_is_converted() {
        let root = TempDir::new().expect("tempdir");
        let path = root.path().join("descriptor.json");
        std::fs::write(&path, r#"{"satellites": 12}"#).expect("write");

        let outcome = processor(&root).handle(&ResourceDescriptor::from_path(&path).save_as("leo"));

        assert!(outcome.success, "got: {outcome}");
        assert!(root.path().join("uploads").join("leo.yaml").is_file());
    }

    #[test]
    fn non_utf8_file_is_an_unexpected_error() {
        let root = TempDir::new().expect("tempdir");
        let path = root.path().join("binary.bin");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x81]).expect("write");

        let outcome = processor(&root).handle(&ResourceDescriptor::from_path(&path));

        assert!(!outcome.success);
        assert!(
            outcome.message.starts_with("An unexpected error occurred: "),
            "got: {}",
            outcome.message
        );
    }

    #[test]
    fn inline_content_without_save_as_is_only_validated() {
        let root = TempDir::new().expect("tempdir");
        let processor = processor(&root);

        let outcome = processor.handle(&ResourceDescriptor::from_content(r#"{"a":1}"#));
        assert_eq!(outcome, Outcome::ok(PROCESSED_MESSAGE));

        let dry = processor.handle(&ResourceDescriptor::from_content(r#"{"a":1}"#).dry_run(true));
        assert_eq!(dry, Outcome::ok(DRY_RUN_MESSAGE));

        assert!(!root.path().join("uploads").exists(), "nothing to save");
    }

    #[test]
    fn invalid_inline_content_without_save_as_fails_validation() {
        let root = TempDir::new().expect("tempdir");
        let outcome = processor(&root).handle(&ResourceDescriptor::from_content("not json"));
        assert_eq!(outcome, Outcome::fail(INVALID_MESSAGE));
    }

    #[test]
    fn save_as_persists_then_reports_success() {
        let root = TempDir::new().expect("tempdir");
        let outcome =
            processor(&root).handle(&ResourceDescriptor::from_content(r#"{"a":1}"#).save_as("x"));

        let path = root.path().join("uploads").join("x.yaml");
        assert!(outcome.success);
        assert_eq!(
            outcome.message,
            format!("{PROCESSED_MESSAGE} Saved as {}", path.display())
        );
        let decoded: serde_json::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).expect("read")).expect("yaml");
        assert_eq!(decoded, serde_json::json!({"a": 1}));
    }

    #[test]
    fn dry_run_with_save_as_still_writes() {
        let root = TempDir::new().expect("tempdir");
        let outcome = processor(&root).handle(
            &ResourceDescriptor::from_content(r#"{"a":1}"#)
                .save_as("x")
                .dry_run(true),
        );

        let path = root.path().join("uploads").join("x.yaml");
        assert!(outcome.success);
        assert!(outcome.message.contains("(dry run)"), "got: {}", outcome.message);
        assert!(path.is_file(), "dry run keeps the write");
    }

    #[test]
    fn invalid_content_with_save_as_fails() {
        let root = TempDir::new().expect("tempdir");
        for dry_run in [false, true] {
            let outcome = processor(&root).handle(
                &ResourceDescriptor::from_content("not json")
                    .save_as("y")
                    .dry_run(dry_run),
            );
            assert_eq!(outcome, Outcome::fail(INVALID_MESSAGE), "dry_run={dry_run}");
        }
        assert!(!root.path().join("uploads").join("y.yaml").exists());
    }

    #[test]
    fn persistence_failure_short_circuits() {
        let root = TempDir::new().expect("tempdir");
        let outcome = processor(&root).handle(
            &ResourceDescriptor::from_content(r#"{"a":1}"#).save_as("../escape"),
        );
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Error saving file: "));
        assert!(!root.path().join("escape.yaml").exists());
    }

    #[test]
    fn preview_truncates_long_content() {
        let long = "x".repeat(80);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(preview("short"), "short");
    }
}
