//! `kvmirror status`: per-intent sync visibility.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mirror_core::markers::{CONDITION_READY, CONDITION_SOURCE_FOUND};
use mirror_core::{ConditionStatus, Intent, Namespace, ObjectStore};
use mirror_sync::conditions::find_condition;

use super::open_store;

/// Arguments for `kvmirror status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show intents in this namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let store = open_store(home);
        let intents = match &self.namespace {
            Some(ns) => store
                .list_intents(&Namespace::from(ns.as_str()))
                .with_context(|| format!("failed to list intents in '{ns}'"))?,
            None => store.list_all_intents().context("failed to list intents")?,
        };

        let rows: Vec<IntentStatusRow> = intents.iter().map(IntentStatusRow::from_intent).collect();
        if self.json {
            print_json(&rows)?;
            return Ok(());
        }

        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct TargetJson {
    target: String,
    synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct IntentStatusRow {
    intent: String,
    namespace: String,
    source: String,
    ready: ConditionStatus,
    source_found: ConditionStatus,
    reason: String,
    message: String,
    targets_synced: usize,
    targets_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_sync_time: Option<DateTime<Utc>>,
    deleting: bool,
    targets: Vec<TargetJson>,
}

impl IntentStatusRow {
    fn from_intent(intent: &Intent) -> Self {
        let ready = find_condition(&intent.status, CONDITION_READY);
        let source_found = find_condition(&intent.status, CONDITION_SOURCE_FOUND);
        let targets: Vec<TargetJson> = intent
            .status
            .synced_targets
            .iter()
            .map(|t| TargetJson {
                target: format!("{}/{}", t.namespace, t.name),
                synced: t.synced,
                error: t.error.clone(),
            })
            .collect();
        Self {
            intent: intent.key().to_string(),
            namespace: intent.metadata.namespace.to_string(),
            source: format!("{}/{}", intent.spec.source.kind, intent.spec.source.name),
            ready: ready.map(|c| c.status).unwrap_or_default(),
            source_found: source_found.map(|c| c.status).unwrap_or_default(),
            reason: ready.map(|c| c.reason.clone()).unwrap_or_default(),
            message: ready
                .map(|c| c.message.clone())
                .unwrap_or_else(|| "not reconciled yet".to_string()),
            targets_synced: targets.iter().filter(|t| t.synced).count(),
            targets_total: intent.spec.targets.len(),
            last_sync_time: intent.status.last_sync_time,
            deleting: intent.metadata.is_deleting(),
            targets,
        }
    }
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "intent")]
    intent: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "ready")]
    ready: String,
    #[tabled(rename = "targets")]
    targets: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "message")]
    message: String,
}

fn print_json(rows: &[IntentStatusRow]) -> Result<()> {
    let ready = rows
        .iter()
        .filter(|r| r.ready == ConditionStatus::True)
        .count();
    let payload = serde_json::json!({
        "summary": { "intents": rows.len(), "ready": ready },
        "intents": rows,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: Vec<IntentStatusRow>) {
    let ready = rows
        .iter()
        .filter(|r| r.ready == ConditionStatus::True)
        .count();
    println!(
        "kvmirror v{} | {} intents | {} ready",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        ready,
    );

    if rows.is_empty() {
        println!("No intents found.");
        return;
    }

    let mut grouped = BTreeMap::<String, Vec<IntentStatusRow>>::new();
    for row in rows {
        grouped.entry(row.namespace.clone()).or_default().push(row);
    }

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    let mut needs_attention = false;
    for (namespace, rows) in grouped {
        println!("{}", namespace.to_uppercase().bold());
        let table_rows: Vec<StatusTableRow> = rows
            .into_iter()
            .map(|row| {
                needs_attention |= row.ready != ConditionStatus::True;
                let ready = ready_label(&row);
                StatusTableRow {
                    intent: row.intent,
                    source: row.source,
                    ready,
                    targets: format!("{}/{}", row.targets_synced, row.targets_total),
                    last_sync: row
                        .last_sync_time
                        .map(format_age)
                        .unwrap_or_else(|| "never".to_string()),
                    message: row.message,
                }
            })
            .collect();
        let mut table = Table::new(table_rows);
        table.with(Style::rounded());
        println!("{table}");
        println!("{separator}");
    }

    if needs_attention {
        println!("Run 'kvmirror reconcile --all' or start the daemon to converge pending intents.");
    }
}

fn ready_label(row: &IntentStatusRow) -> String {
    if row.deleting {
        return "DELETING".yellow().bold().to_string();
    }
    match row.ready {
        ConditionStatus::True => "READY".green().bold().to_string(),
        ConditionStatus::False => "NOT READY".red().bold().to_string(),
        ConditionStatus::Unknown => "PENDING".bright_black().bold().to_string(),
    }
}

fn format_age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
