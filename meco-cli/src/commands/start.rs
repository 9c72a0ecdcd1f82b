//! `meco start` — send a resource descriptor to the running service.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use meco_core::{Outcome, ResourceDescriptor};
use meco_daemon::{request_start, MecoConfig};

/// Arguments for `meco start`.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Path of a resource descriptor file on this machine.
    #[arg(conflicts_with = "content")]
    pub filename: Option<PathBuf>,

    /// Provide the descriptor content directly as a string.
    #[arg(long)]
    pub content: Option<String>,

    /// Store the converted descriptor on the server under this name.
    #[arg(long, value_name = "NAME")]
    pub save_as: Option<String>,

    /// Validate first and label the result as a dry run.
    #[arg(long)]
    pub dry_run: bool,
}

impl StartArgs {
    pub fn run(self, config: &MecoConfig) -> Result<()> {
        let cwd = std::env::current_dir().context("could not determine current directory")?;
        let descriptor = self.descriptor(&cwd);

        let outcome = request_start(config, descriptor)
            .with_context(|| format!("failed to reach meco service at {}", config.addr))?;
        report(&outcome)
    }

    /// Build the descriptor; relative paths are resolved against `cwd`
    /// because the service runs from a different directory.
    pub fn descriptor(&self, cwd: &Path) -> ResourceDescriptor {
        let mut descriptor = match (&self.filename, &self.content) {
            (Some(path), _) => ResourceDescriptor::from_path(cwd.join(path)),
            (None, Some(content)) => ResourceDescriptor::from_content(content.clone()),
            (None, None) => ResourceDescriptor::default(),
        };
        descriptor.save_as = self.save_as.clone();
        descriptor.dry_run = self.dry_run;
        descriptor
    }
}

fn report(outcome: &Outcome) -> Result<()> {
    if outcome.success {
        println!(
            "{} successfully processed resource: {}",
            "✓".green().bold(),
            outcome.message
        );
        Ok(())
    } else {
        bail!("failed to process resource: {}", outcome.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meco_core::Payload;

    fn args(filename: Option<&str>, content: Option<&str>) -> StartArgs {
        StartArgs {
            filename: filename.map(PathBuf::from),
            content: content.map(str::to_string),
            save_as: Some("x".into()),
            dry_run: true,
        }
    }

    #[test]
    fn relative_filename_is_resolved_against_cwd() {
        let descriptor = args(Some("specs/leo.json"), None).descriptor(Path::new("/home/op"));
        assert_eq!(
            descriptor.payload,
            Some(Payload::FilePath(PathBuf::from("/home/op/specs/leo.json")))
        );
        assert_eq!(descriptor.save_as.as_deref(), Some("x"));
        assert!(descriptor.dry_run);
    }

    #[test]
    fn absolute_filename_is_kept() {
        let descriptor = args(Some("/srv/leo.json"), None).descriptor(Path::new("/home/op"));
        assert_eq!(
            descriptor.payload,
            Some(Payload::FilePath(PathBuf::from("/srv/leo.json")))
        );
    }

    #[test]
    fn inline_content_is_sent_verbatim() {
        let descriptor = args(None, Some("{\"a\":1}")).descriptor(Path::new("/"));
        assert_eq!(
            descriptor.payload,
            Some(Payload::FileContent("{\"a\":1}".into()))
        );
    }

    #[test]
    fn no_payload_is_left_for_the_service_to_reject() {
        let descriptor = args(None, None).descriptor(Path::new("/"));
        assert_eq!(descriptor.payload, None);
    }
}
