// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mirsync` - operator CLI for the mirsync daemon.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client::ControlClient;
use mirsync_daemon::protocol::Request;

#[derive(Parser)]
#[command(name = "mirsync", about = "Control a running mirsync daemon", version)]
struct Cli {
    /// Control socket path
    #[arg(short = 's', long, default_value = "/var/run/mirsync.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show mirror status (all mirrors unless one is named)
    Status {
        mirror: Option<String>,
    },
    /// Start a mirror's job
    Start {
        mirror: String,
    },
    /// Stop a mirror's job
    Stop {
        mirror: String,
    },
    /// Stop and immediately restart a mirror's job
    Restart {
        mirror: String,
    },
    /// Print the path of a mirror's latest (or n-th newest) log
    Log {
        mirror: String,
        /// 0 = latest, 1 = previous, ...
        #[arg(short, long, default_value_t = 0)]
        n: u64,
    },
    /// Ask the daemon to reload its config file
    Reload {
        /// Kill running jobs instead of letting them finish
        #[arg(long)]
        force: bool,
        /// Daemon pidfile
        #[arg(long, default_value = "/var/run/mirsyncd.pid")]
        pidfile: PathBuf,
    },
    /// Delete leftover garbage snapshots under the mirror root
    Gc {
        /// Config file naming the mirror root
        #[arg(short, long, default_value = "/etc/mirsync.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        eprintln!("mirsync: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = ControlClient::new(&cli.socket);
    match cli.command {
        Command::Status { mirror } => {
            let target = mirror.unwrap_or_else(|| "__ALL__".to_string());
            print_reply(client.send(&Request::new("status", target)).await?)
        }
        Command::Start { mirror } => {
            print_reply(client.send(&Request::new("start", mirror)).await?)
        }
        Command::Stop { mirror } => {
            print_reply(client.send(&Request::new("stop", mirror)).await?)
        }
        Command::Restart { mirror } => {
            print_reply(client.send(&Request::new("restart", mirror)).await?)
        }
        Command::Log { mirror, n } => {
            let mut request = Request::new("log", mirror);
            request.kwargs.insert("n".to_string(), serde_json::json!(n));
            print_reply(client.send(&request).await?)
        }
        Command::Reload { force, pidfile } => reload(force, &pidfile),
        Command::Gc { config } => gc(&config).await,
    }
}

fn print_reply(reply: String) -> Result<()> {
    println!("{reply}");
    Ok(())
}

/// Signal the daemon from its pidfile: USR1 = soft, USR2 = force.
fn reload(force: bool, pidfile: &std::path::Path) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let content = std::fs::read_to_string(pidfile)
        .with_context(|| format!("failed to read pidfile {}", pidfile.display()))?;
    let pid: i32 = content
        .trim()
        .parse()
        .map_err(|_| anyhow!("pidfile {} does not contain a PID", pidfile.display()))?;

    let signal = if force { Signal::SIGUSR2 } else { Signal::SIGUSR1 };
    kill(Pid::from_raw(pid), signal)
        .with_context(|| format!("failed to signal daemon (pid {pid})"))?;
    println!("Reload requested (pid {pid})");
    Ok(())
}

async fn gc(config: &std::path::Path) -> Result<()> {
    let settings = mirsync_config::Settings::load(config)?;
    let mirror_root = PathBuf::from(&settings.global.mirror_root);
    let removed = mirsync_daemon::gc::collect_garbage(&mirror_root, "btrfs").await?;
    println!("Removed {removed} garbage snapshot(s)");
    Ok(())
}
