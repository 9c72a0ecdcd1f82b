//! `meco echo` — round-trip a message through the running service.

use anyhow::{Context, Result};
use clap::Args;

use meco_daemon::{request_echo, MecoConfig};

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Message to send.
    pub message: String,
}

impl EchoArgs {
    pub fn run(self, config: &MecoConfig) -> Result<()> {
        let reply = request_echo(config, &self.message)
            .with_context(|| format!("echo to {} failed", config.addr))?;
        println!("{reply}");
        Ok(())
    }
}
