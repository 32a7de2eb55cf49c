//! `kvmirror apply -f <intent.yaml>`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize as _;

use mirror_core::{Intent, StoreAdmin};

use super::open_store;

/// Arguments for `kvmirror apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Intent manifest. Several intents may be separated with `---`.
    #[arg(long = "file", short = 'f')]
    pub file: PathBuf,
}

impl ApplyArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let raw = fs::read_to_string(&self.file)
            .with_context(|| format!("cannot read '{}'", self.file.display()))?;
        let intents = parse_intents(&raw)
            .with_context(|| format!("invalid intent manifest '{}'", self.file.display()))?;
        if intents.is_empty() {
            anyhow::bail!("'{}' contains no intents", self.file.display());
        }

        let store = open_store(home);
        for intent in intents {
            let key = intent.key();
            let stored = store
                .apply_intent(&intent)
                .with_context(|| format!("failed to apply intent {key}"))?;
            println!(
                "✓ Intent {key} applied (generation {})",
                stored.metadata.generation
            );
        }
        Ok(())
    }
}

fn parse_intents(raw: &str) -> Result<Vec<Intent>> {
    let mut intents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(raw) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        intents.push(serde_yaml::from_value(value)?);
    }
    Ok(intents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_document_manifest() {
        let raw = r#"
metadata:
  name: db-sync
  namespace: platform
spec:
  source:
    kind: Secret
    name: db-credentials
  targets:
    - namespace: backend
---
metadata:
  name: cfg-sync
  namespace: platform
spec:
  source:
    kind: ConfigMap
    name: app-config
  targets:
    - namespace: backend
      name: shared-config
  syncPolicy:
    mode: merge
"#;
        let intents = parse_intents(raw).expect("parse");
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].metadata.name, "db-sync");
        assert_eq!(
            intents[1].spec.targets[0].name.as_deref(),
            Some("shared-config")
        );
    }

    #[test]
    fn empty_documents_are_skipped() {
        let intents = parse_intents("---\n").expect("parse");
        assert!(intents.is_empty());
    }
}
