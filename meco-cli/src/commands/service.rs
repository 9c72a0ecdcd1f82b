//! `meco on|off|status|logs|serve` — service lifecycle.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use meco_daemon::{
    request_echo, serve_blocking, MecoConfig, StopStrategy, SystemLifecycle, TurnOff, TurnOn,
};

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn turn_on(config: &MecoConfig) -> Result<()> {
    let lifecycle = SystemLifecycle::for_config(config).context("failed to prepare launcher")?;
    match lifecycle.turn_on().context("failed to turn meco service on")? {
        TurnOn::AlreadyOn { pid } => {
            println!("{} meco service is already on (PID {pid})", "!".yellow().bold());
        }
        TurnOn::Started { pid, stale_removed } => {
            if let Some(stale) = stale_removed {
                println!("removed stale PID record ({stale})");
            }
            println!(
                "{} meco service turned on in background (PID {pid}, {})",
                "✓".green().bold(),
                config.addr
            );
        }
    }
    Ok(())
}

pub fn turn_off(config: &MecoConfig, targeted: bool) -> Result<()> {
    let strategy = if targeted {
        StopStrategy::Targeted
    } else {
        StopStrategy::Sweep
    };
    let lifecycle = SystemLifecycle::for_config(config).context("failed to prepare lifecycle")?;
    match lifecycle
        .turn_off(strategy)
        .context("failed to turn meco service off")?
    {
        TurnOff::AlreadyOff { record_removed } => {
            if record_removed {
                println!("removed stale PID record (no live service behind it)");
            }
            println!("{} meco service is already off", "!".yellow().bold());
        }
        TurnOff::Stopped { terminated, killed } => {
            for pid in &terminated {
                println!("  ✎  terminated PID {pid}");
            }
            for pid in &killed {
                println!("  ✗  killed PID {pid} (ignored SIGTERM)");
            }
            println!("{} meco service turned off", "✓".green().bold());
        }
    }
    Ok(())
}

pub fn status(config: &MecoConfig, json: bool) -> Result<()> {
    let lifecycle = SystemLifecycle::for_config(config).context("failed to prepare lifecycle")?;
    let status = lifecycle.status().context("failed to read service status")?;
    let responding = request_echo(config, "status").is_ok();

    if json {
        let payload = serde_json::json!({
            "running": !status.instances.is_empty(),
            "responding": responding,
            "addr": config.addr.to_string(),
            "pid_file": config.pid_file().display().to_string(),
            "record": status.record,
            "record_alive": status.record_alive,
            "instances": status.instances,
            "checked_at": chrono::Utc::now().to_rfc3339(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
        );
        return Ok(());
    }

    let state = if status.instances.is_empty() {
        "off".red().bold()
    } else {
        "on".green().bold()
    };
    println!("meco service: {state}");
    println!("  endpoint:  {} ({})", config.addr, if responding { "responding" } else { "not responding" });
    match status.record {
        Some(pid) if status.record_alive => println!("  PID file:  {} ({pid})", config.pid_file().display()),
        Some(pid) => println!("  PID file:  {} ({pid}, stale)", config.pid_file().display()),
        None => println!("  PID file:  none"),
    }
    if !status.instances.is_empty() {
        let pids: Vec<String> = status.instances.iter().map(u32::to_string).collect();
        println!("  instances: {}", pids.join(", "));
    }
    Ok(())
}

pub fn logs(config: &MecoConfig, args: &LogsArgs) -> Result<()> {
    if args.stderr_only {
        print_tail(&config.stderr_log(), args.lines).context("failed to read service stderr log")?;
    } else {
        print_tail(&config.stdout_log(), args.lines).context("failed to read service stdout log")?;
        print_tail(&config.stderr_log(), args.lines).context("failed to read service stderr log")?;
    }
    Ok(())
}

pub fn serve(config: &MecoConfig) -> Result<()> {
    serve_blocking(config).context("meco service exited with error")
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
