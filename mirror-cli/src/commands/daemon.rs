//! `kvmirror daemon`: run the controller in the foreground and talk to it.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use mirror_daemon::paths::socket_path;
use mirror_daemon::{request_reconcile, request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the controller in the foreground (watcher, worker and socket server).
    Start,
    /// Request graceful shutdown over the Unix socket.
    Stop,
    /// Query runtime status over the Unix socket.
    Status,
    /// Ask the running controller to reconcile now.
    Reconcile(DaemonReconcileArgs),
}

#[derive(Args, Debug)]
pub struct DaemonReconcileArgs {
    /// Intent as `<namespace>/<name>`; omit to reconcile everything.
    pub intent: Option<String>,
}

pub fn run(home: &Path, command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            start_blocking(home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Reconcile(args) => {
            let summary = request_reconcile(home, args.intent)
                .context("daemon reconcile request failed")?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
