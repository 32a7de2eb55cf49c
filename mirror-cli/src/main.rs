//! kvmirror: mirror Secret and ConfigMap bundles across namespaces.
//!
//! # Usage
//!
//! ```text
//! kvmirror namespace create <name>
//! kvmirror namespace list
//! kvmirror put <kind> <ns>/<name> [KEY=VALUE...] [--from-file KEY=PATH] [--type TYPE]
//! kvmirror get <kind> <ns>/<name> [--show-secrets]
//! kvmirror apply -f <intent.yaml>
//! kvmirror delete <intent|secret|configmap> <ns>/<name>
//! kvmirror reconcile <ns>/<name> | --all | --namespace <ns>
//! kvmirror status [--namespace <ns>] [--json]
//! kvmirror diff <ns>/<name>
//! kvmirror daemon start|stop|status
//! kvmirror daemon reconcile [<ns>/<name>]
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    apply::ApplyArgs,
    daemon::DaemonCommand,
    diff::DiffArgs,
    namespace::NamespaceCommand,
    objects::{DeleteArgs, GetArgs, PutArgs},
    reconcile::ReconcileArgs,
    status::StatusArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "kvmirror",
    version,
    about = "Keep Secret and ConfigMap copies converged across namespaces",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or list namespaces.
    Namespace {
        #[command(subcommand)]
        command: NamespaceCommand,
    },

    /// Create or replace a Secret or ConfigMap.
    Put(PutArgs),

    /// Print a Secret or ConfigMap.
    Get(GetArgs),

    /// Create or update a mirroring intent from a YAML file.
    Apply(ApplyArgs),

    /// Delete an intent or an object.
    Delete(DeleteArgs),

    /// Run reconcile passes in this process.
    Reconcile(ReconcileArgs),

    /// Show the status of every intent.
    Status(StatusArgs),

    /// Show what the next pass would change for an intent.
    Diff(DiffArgs),

    /// Run or control the background controller.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = dirs::home_dir().context("could not determine home directory")?;
    match cli.command {
        Commands::Namespace { command } => commands::namespace::run(&home, command),
        Commands::Put(args) => args.run(&home),
        Commands::Get(args) => args.run(&home),
        Commands::Apply(args) => args.run(&home),
        Commands::Delete(args) => args.run(&home),
        Commands::Reconcile(args) => args.run(&home),
        Commands::Status(args) => args.run(&home),
        Commands::Diff(args) => args.run(&home),
        Commands::Daemon { command } => commands::daemon::run(&home, command),
    }
}
