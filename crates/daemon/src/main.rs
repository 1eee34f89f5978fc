// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mirsyncd` - mirror synchronization supervisor daemon.

use std::path::PathBuf;

use clap::Parser;
use mirsync_config::Settings;
use mirsync_daemon::lifecycle::{self, LifecycleError};
use mirsync_daemon::listener::ControlServer;
use mirsync_daemon::supervisor::{Supervisor, SupervisorError};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mirsyncd", about = "Mirror synchronization supervisor daemon", version)]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "/etc/mirsync.toml")]
    config: PathBuf,

    /// Path to the pidfile
    #[arg(long, default_value = "/var/run/mirsyncd.pid")]
    pidfile: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] mirsync_config::ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

fn init_logging(log_file: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "mirsyncd.log".to_string());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let settings = Settings::load(&args.config)?;
    let socket_path = settings.global.ctrl_addr.clone();

    // Lock first: a second daemon must fail before touching the socket.
    let _pidfile_lock = lifecycle::acquire_pidfile(&args.pidfile)?;
    let listener = lifecycle::bind_control_socket(&socket_path).await?;

    let supervisor = Supervisor::new(settings, args.config.clone())?;
    let server = ControlServer::new(listener, supervisor.event_sender());
    let server_task = tokio::spawn(server.run());

    info!(config = %args.config.display(), "mirsyncd started");
    let result = supervisor.run().await;

    server_task.abort();
    lifecycle::cleanup(&socket_path, &args.pidfile);
    Ok(result?)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_file.as_ref());

    if let Err(e) = run(args).await {
        eprintln!("mirsyncd: {e}");
        std::process::exit(1);
    }
}
