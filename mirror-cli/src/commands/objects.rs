//! `kvmirror put`, `kvmirror get` and `kvmirror delete`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use mirror_core::{Bundle, KvObject, ObjectKey, ObjectStore, ResourceKind, StoreAdmin};
use mirror_sync::checksum::value_digest;

use super::open_store;

/// Arguments for `kvmirror put`.
#[derive(Args, Debug)]
pub struct PutArgs {
    /// `secret` or `configmap`.
    pub kind: ResourceKind,

    /// Object to write, as `<namespace>/<name>`.
    pub key: ObjectKey,

    /// Literal entries as `KEY=VALUE`.
    #[arg(value_name = "KEY=VALUE")]
    pub entries: Vec<String>,

    /// Entry read from a file, as `KEY=PATH`. Repeatable.
    #[arg(long = "from-file", value_name = "KEY=PATH")]
    pub from_file: Vec<String>,

    /// Secret type tag (e.g. `kubernetes.io/tls`).
    #[arg(long = "type", value_name = "TYPE")]
    pub type_tag: Option<String>,
}

impl PutArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        if self.type_tag.is_some() && self.kind != ResourceKind::Secret {
            bail!("--type only applies to secrets");
        }

        let mut data = Bundle::new();
        for entry in &self.entries {
            let (key, value) = split_entry(entry)?;
            data.insert(key.to_string(), value.as_bytes().to_vec());
        }
        for entry in &self.from_file {
            let (key, path) = split_entry(entry)?;
            let path = PathBuf::from(path);
            let bytes =
                fs::read(&path).with_context(|| format!("cannot read '{}'", path.display()))?;
            data.insert(key.to_string(), bytes);
        }

        let store = open_store(home);
        let mut object = KvObject::new(
            self.kind,
            self.key.namespace.clone(),
            self.key.name.clone(),
            data,
        );
        object.type_tag = self.type_tag;

        // Keep existing markers so a managed copy stays managed.
        match store.get_object(self.kind, &self.key) {
            Ok(existing) => {
                object.metadata.annotations = existing.metadata.annotations;
                if object.type_tag.is_none() {
                    object.type_tag = existing.type_tag;
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {} {}", self.kind, self.key))
            }
        }

        let written = store
            .put_object(&object)
            .with_context(|| format!("failed to write {} {}", self.kind, self.key))?;
        println!(
            "✓ {} {} written ({} keys)",
            written.kind,
            written.key(),
            written.data.len()
        );
        Ok(())
    }
}

fn split_entry(entry: &str) -> Result<(&str, &str)> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("expected KEY=VALUE, got '{entry}'"),
    }
}

/// Arguments for `kvmirror get`.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// `secret` or `configmap`.
    pub kind: ResourceKind,

    /// Object to print, as `<namespace>/<name>`.
    pub key: ObjectKey,

    /// Print secret values instead of digests.
    #[arg(long)]
    pub show_secrets: bool,
}

impl GetArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let store = open_store(home);
        let object = store
            .get_object(self.kind, &self.key)
            .with_context(|| format!("failed to read {} {}", self.kind, self.key))?;

        println!("{} {}", object.kind, object.key());
        if let Some(type_tag) = &object.type_tag {
            println!("type: {type_tag}");
        }
        if !object.metadata.annotations.is_empty() {
            println!("annotations:");
            for (key, value) in &object.metadata.annotations {
                println!("  {key}: {value}");
            }
        }
        println!("data:");
        let mask = object.kind == ResourceKind::Secret && !self.show_secrets;
        for (key, value) in &object.data {
            if mask {
                println!("  {key}={}", value_digest(value));
            } else {
                println!("  {key}={}", String::from_utf8_lossy(value));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeleteKind {
    Intent,
    Secret,
    Configmap,
}

/// Arguments for `kvmirror delete`.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub kind: DeleteKind,

    /// `<namespace>/<name>`.
    pub key: ObjectKey,
}

impl DeleteArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let store = open_store(home);
        let kind = match self.kind {
            DeleteKind::Intent => {
                let pending = store
                    .delete_intent(&self.key)
                    .with_context(|| format!("failed to delete intent {}", self.key))?;
                match pending {
                    Some(_) => println!(
                        "✓ Intent {} marked for deletion; the next pass cleans up its targets",
                        self.key
                    ),
                    None => println!("✓ Intent {} deleted", self.key),
                }
                return Ok(());
            }
            DeleteKind::Secret => ResourceKind::Secret,
            DeleteKind::Configmap => ResourceKind::ConfigMap,
        };
        store
            .delete_object(kind, &self.key)
            .with_context(|| format!("failed to delete {kind} {}", self.key))?;
        println!("✓ {kind} {} deleted", self.key);
        Ok(())
    }
}
