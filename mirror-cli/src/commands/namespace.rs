//! `kvmirror namespace create <name>` and `kvmirror namespace list`

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;

use mirror_core::{validate_name, Namespace, ObjectStore, ResourceKind, StoreAdmin};

use super::open_store;

#[derive(Subcommand, Debug)]
pub enum NamespaceCommand {
    /// Create a namespace. Creating an existing namespace is a no-op.
    Create {
        /// Namespace name (e.g. "platform", "backend").
        name: String,
    },

    /// List namespaces.
    List,
}

pub fn run(home: &Path, command: NamespaceCommand) -> Result<()> {
    let store = open_store(home);
    match command {
        NamespaceCommand::Create { name } => {
            validate_name("namespace", &name).map_err(anyhow::Error::msg)?;
            let namespace = Namespace::from(name.as_str());
            if store
                .namespace_exists(&namespace)
                .with_context(|| format!("failed to check namespace '{name}'"))?
            {
                println!("✓ Namespace '{name}' already exists");
                return Ok(());
            }
            store
                .create_namespace(&namespace)
                .with_context(|| format!("failed to create namespace '{name}'"))?;
            println!("✓ Namespace '{name}' ready");
        }
        NamespaceCommand::List => {
            let namespaces = store
                .list_namespaces()
                .context("failed to list namespaces")?;
            if namespaces.is_empty() {
                println!("No namespaces. Run: kvmirror namespace create <name>");
            }
            for ns in namespaces {
                let intents = store
                    .list_intents(&ns)
                    .with_context(|| format!("failed to list intents in '{ns}'"))?
                    .len();
                let mut counts = vec![format!("{intents} intents")];
                for kind in ResourceKind::all() {
                    let objects = store
                        .list_objects(*kind, &ns)
                        .with_context(|| format!("failed to list {kind} objects in '{ns}'"))?;
                    counts.push(format!("{} {}", objects.len(), kind.dir_name()));
                }
                println!("{ns}  ({})", counts.join(", "));
            }
        }
    }
    Ok(())
}
