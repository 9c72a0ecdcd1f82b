//! Meco — resource descriptor service and its control surface.
//!
//! # Usage
//!
//! ```text
//! meco on
//! meco off [--targeted]
//! meco status [--json]
//! meco logs [--lines N] [--stderr-only]
//! meco start [FILENAME] [--content TEXT] [--save-as NAME] [--dry-run]
//! meco echo <MESSAGE>
//! ```
//!
//! Every command accepts `--runtime-dir` (`MECO_RUNTIME_DIR`) and `--port`
//! (`MECO_PORT`).

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{echo::EchoArgs, service::LogsArgs, start::StartArgs};
use meco_daemon::paths::{default_runtime_dir, DEFAULT_PORT, PORT_ENV, RUNTIME_DIR_ENV};
use meco_daemon::MecoConfig;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "meco",
    version,
    about = "Emulates a LEO mega constellation resource service",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Directory holding the PID record, uploads and logs.
    #[arg(long, global = true, env = RUNTIME_DIR_ENV, value_name = "DIR")]
    runtime_dir: Option<PathBuf>,

    /// Loopback port of the service endpoint.
    #[arg(long, global = true, env = PORT_ENV, default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl GlobalArgs {
    fn config(&self) -> MecoConfig {
        let runtime_dir = self.runtime_dir.clone().unwrap_or_else(default_runtime_dir);
        MecoConfig::new(runtime_dir, self.port)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Turn the service on in the background.
    On,

    /// Turn the service off.
    Off {
        /// Stop only the process named by the PID record instead of every
        /// running instance.
        #[arg(long)]
        targeted: bool,
    },

    /// Show the PID record and running instances.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print recent service log lines.
    Logs(LogsArgs),

    /// Send a resource descriptor to the running service.
    Start(StartArgs),

    /// Round-trip a message through the service.
    Echo(EchoArgs),

    /// Run the service in the foreground.
    #[command(hide = true)]
    Serve,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if matches!(cli.command, Commands::Serve) {
        meco_daemon::init_tracing();
    } else {
        meco_daemon::init_cli_tracing();
    }
    let config = cli.global.config();

    match cli.command {
        Commands::On => commands::service::turn_on(&config),
        Commands::Off { targeted } => commands::service::turn_off(&config, targeted),
        Commands::Status { json } => commands::service::status(&config, json),
        Commands::Logs(args) => commands::service::logs(&config, &args),
        Commands::Start(args) => args.run(&config),
        Commands::Echo(args) => args.run(&config),
        Commands::Serve => commands::service::serve(&config),
    }
}
