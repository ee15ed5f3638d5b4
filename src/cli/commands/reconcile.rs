//! Reconcile command for collapsing duplicate execution records
//!
//! Dry-run by default: reports what would change and touches nothing until
//! `--execute` is passed. One missing or malformed partition never aborts
//! the rest of a batch run.

use anyhow::Result;
use clap::Args;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

use crate::data_paths::DataPaths;
use crate::reconcile::{reconcile, ReconcileReport};
use crate::store::{EventLogStore, PartitionKey, StoreError};

#[derive(Args, Clone)]
pub struct ReconcileArgs {
    /// Operate on one explicit partition file
    #[arg(long, conflicts_with_all = ["all", "date"])]
    pub file: Option<PathBuf>,

    /// Operate on every executions_*.jsonl file in the data directory
    #[arg(long, conflicts_with = "date")]
    pub all: bool,

    /// Operate on one partition day (YYYYMMDD); default is today
    #[arg(long)]
    pub date: Option<String>,

    /// Commit the canonical records (without this flag nothing is modified)
    #[arg(long)]
    pub execute: bool,
}

pub struct ReconcileCommand {
    args: ReconcileArgs,
}

impl ReconcileCommand {
    pub fn new(args: ReconcileArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths) -> Result<()> {
        let dry_run = !self.args.execute;
        if dry_run {
            println!(
                "{}",
                "Dry run: no files will be modified (pass --execute to commit)".yellow()
            );
        }

        let targets = self.resolve_targets(&data_paths)?;
        if targets.is_empty() {
            if self.args.all {
                println!(
                    "No partition files found in {}",
                    data_paths.executions().display()
                );
            }
            return Ok(());
        }

        let mut removed_total = 0;
        let mut reconciled = 0;
        let mut failures = 0;
        for (store, key) in &targets {
            match reconcile(store, key, dry_run) {
                Ok(report) => {
                    print_report(&report);
                    removed_total += report.removed;
                    reconciled += 1;
                }
                Err(StoreError::MissingPartition(path)) => {
                    println!(
                        "{} partition {}: file not found ({})",
                        "skipped".yellow(),
                        key.to_string().bold(),
                        path.display()
                    );
                    failures += 1;
                }
                Err(e) => {
                    println!(
                        "{} partition {}: {}",
                        "failed".bright_red(),
                        key.to_string().bold(),
                        e
                    );
                    failures += 1;
                }
            }
        }

        println!();
        println!(
            "{} {} partition(s) processed, {} record(s) {}, {} problem(s)",
            "Summary:".bright_yellow(),
            reconciled,
            removed_total,
            if dry_run { "would be removed" } else { "removed" },
            failures
        );
        Ok(())
    }

    /// Resolve which (store, partition) pairs to operate on
    fn resolve_targets(
        &self,
        data_paths: &DataPaths,
    ) -> Result<Vec<(EventLogStore, PartitionKey)>> {
        if let Some(file) = &self.args.file {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            return match PartitionKey::from_file_name(name) {
                Some(key) => {
                    let dir = file.parent().unwrap_or_else(|| Path::new("."));
                    Ok(vec![(EventLogStore::new(dir), key)])
                }
                None => {
                    println!(
                        "{} {} is not an executions_<YYYYMMDD>.jsonl file",
                        "failed".bright_red(),
                        file.display()
                    );
                    Ok(Vec::new())
                }
            };
        }

        let store = EventLogStore::new(data_paths.executions());
        if self.args.all {
            let keys = store.list_partitions()?;
            return Ok(keys.into_iter().map(|key| (store.clone(), key)).collect());
        }

        let key = match &self.args.date {
            Some(date) => PartitionKey::parse(date)?,
            None => PartitionKey::today(),
        };
        Ok(vec![(store, key)])
    }
}

fn print_report(report: &ReconcileReport) {
    println!();
    println!(
        "{} {}",
        "Partition".bright_blue().bold(),
        report.partition.to_string().bold()
    );
    println!(
        "  {} record(s) read, {} distinct pair(s), {} duplicate(s), {} unparseable line(s) skipped",
        report.total, report.distinct, report.removed, report.skipped_lines
    );

    let duplicates: Vec<_> = report
        .decisions
        .iter()
        .filter(|d| d.group_size > 1)
        .collect();
    if !duplicates.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Pair", "Records", "Kept"]);
        for decision in duplicates {
            table.add_row(vec![
                decision.pair_id.clone(),
                decision.group_size.to_string(),
                decision.selection.to_string(),
            ]);
        }
        println!("{table}");
    }

    if report.committed {
        match &report.backup {
            Some(backup) => println!(
                "  {} canonical records written, backup at {}",
                "committed:".bright_green(),
                backup.display()
            ),
            None => println!(
                "  {} canonical records written (new partition, no backup)",
                "committed:".bright_green()
            ),
        }
    }
}
