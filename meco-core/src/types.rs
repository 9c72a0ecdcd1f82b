//! Request and response types for the Meco service.
//!
//! On the wire a descriptor is a flat object carrying at most one of
//! `file_path` / `file_content`; in memory the payload is a tagged enum so the
//! processor can match on it exhaustively.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Where the content of a request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A file already resident on the machine running the service.
    FilePath(PathBuf),
    /// Content sent inline with the request.
    FileContent(String),
}

// ---------------------------------------------------------------------------
// ResourceDescriptor
// ---------------------------------------------------------------------------

/// An incoming `Start` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorFields", into = "DescriptorFields")]
pub struct ResourceDescriptor {
    /// `None` when the caller set neither content field.
    pub payload: Option<Payload>,
    /// Destination name inside the storage directory.
    pub save_as: Option<String>,
    pub dry_run: bool,
}

impl ResourceDescriptor {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            payload: Some(Payload::FilePath(path.into())),
            ..Self::default()
        }
    }

    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            payload: Some(Payload::FileContent(content.into())),
            ..Self::default()
        }
    }

    pub fn save_as(mut self, name: impl Into<String>) -> Self {
        self.save_as = Some(name.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Flat wire form of [`ResourceDescriptor`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DescriptorFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    save_as: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

impl TryFrom<DescriptorFields> for ResourceDescriptor {
    type Error = String;

    fn try_from(fields: DescriptorFields) -> Result<Self, Self::Error> {
        let payload = match (fields.file_path, fields.file_content) {
            (Some(_), Some(_)) => {
                return Err("file_path and file_content are mutually exclusive".to_string())
            }
            (Some(path), None) => Some(Payload::FilePath(path)),
            (None, Some(content)) => Some(Payload::FileContent(content)),
            (None, None) => None,
        };
        Ok(Self {
            payload,
            save_as: fields.save_as,
            dry_run: fields.dry_run,
        })
    }
}

impl From<ResourceDescriptor> for DescriptorFields {
    fn from(descriptor: ResourceDescriptor) -> Self {
        let (file_path, file_content) = match descriptor.payload {
            Some(Payload::FilePath(path)) => (Some(path), None),
            Some(Payload::FileContent(content)) => (None, Some(content)),
            None => (None, None),
        };
        Self {
            file_path,
            file_content,
            save_as: descriptor.save_as,
            dry_run: descriptor.dry_run,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result reported back to the caller of `Start`.
///
/// `message` is meant for humans; nothing should branch on its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Generic failure for faults that escaped the pipeline's own checks.
    pub fn unexpected(detail: impl fmt::Display) -> Self {
        Self::fail(format!("An unexpected error occurred: {detail}"))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        write!(f, "{status}: {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_decodes_inline_content_with_modifiers() {
        let descriptor: ResourceDescriptor =
            serde_json::from_str(r#"{"file_content":"{}","save_as":"x","dry_run":true}"#)
                .expect("decode");
        assert_eq!(
            descriptor,
            ResourceDescriptor::from_content("{}").save_as("x").dry_run(true)
        );
    }

    #[test]
    fn descriptor_without_content_fields_decodes_to_no_payload() {
        let descriptor: ResourceDescriptor = serde_json::from_str(r#"{"save_as":"x"}"#).expect("decode");
        assert!(descriptor.payload.is_none());
        assert!(!descriptor.dry_run, "dry_run defaults to false");
    }

    #[test]
    fn descriptor_with_both_content_fields_is_rejected() {
        let err = serde_json::from_str::<ResourceDescriptor>(
            r#"{"file_path":"/tmp/a.json","file_content":"{}"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"), "got: {err}");
    }

    #[test]
    fn descriptor_encodes_to_flat_fields() {
        let encoded = serde_json::to_value(ResourceDescriptor::from_path("/srv/in.json"))
            .expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({ "file_path": "/srv/in.json", "dry_run": false })
        );
    }
}
