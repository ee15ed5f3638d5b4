//! Show command: render one partition's records as a table

use anyhow::Result;
use chrono::DateTime;
use clap::Args;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

use crate::data_paths::DataPaths;
use crate::store::{EventLogStore, ExecutionRecord, PartitionKey, StoreError};

#[derive(Args, Clone)]
pub struct ShowArgs {
    /// Partition day to display (YYYYMMDD); default is today
    #[arg(long, conflicts_with = "file")]
    pub date: Option<String>,

    /// Display one explicit partition file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

pub struct ShowCommand {
    args: ShowArgs,
}

impl ShowCommand {
    pub fn new(args: ShowArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths) -> Result<()> {
        let (store, key) = match &self.args.file {
            Some(file) => {
                let name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                let Some(key) = PartitionKey::from_file_name(name) else {
                    println!(
                        "{} {} is not an executions_<YYYYMMDD>.jsonl file",
                        "failed".bright_red(),
                        file.display()
                    );
                    return Ok(());
                };
                let dir = file.parent().unwrap_or_else(|| Path::new("."));
                (EventLogStore::new(dir), key)
            }
            None => {
                let key = match &self.args.date {
                    Some(date) => PartitionKey::parse(date)?,
                    None => PartitionKey::today(),
                };
                (EventLogStore::new(data_paths.executions()), key)
            }
        };

        let read = match store.read_all(&key) {
            Ok(read) => read,
            Err(StoreError::MissingPartition(path)) => {
                println!(
                    "No executions recorded for {} ({})",
                    key.to_string().bold(),
                    path.display()
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        println!(
            "{} {} — {} record(s)",
            "Partition".bright_blue().bold(),
            key.to_string().bold(),
            read.records.len()
        );

        if read.records.is_empty() {
            println!("{}", "No records".bright_black().italic());
        } else {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["Pair", "Status", "Time (UTC)", "Details"]);
            for record in &read.records {
                table.add_row(vec![
                    record.pair_id.clone(),
                    record.status.to_string(),
                    format_ts(record.ts),
                    format_extra(record),
                ]);
            }
            println!("{table}");
        }

        if read.skipped > 0 {
            println!(
                "{} {} unparseable line(s) skipped",
                "warning:".yellow(),
                read.skipped
            );
        }
        Ok(())
    }
}

fn format_ts(ts: i64) -> String {
    match DateTime::from_timestamp_millis(ts) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => ts.to_string(),
    }
}

/// Compact one-line rendering of the open-ended extra fields
fn format_extra(record: &ExecutionRecord) -> String {
    let mut parts: Vec<String> = record
        .extra
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    parts.sort();
    let joined = parts.join(" ");
    if joined.chars().count() > 60 {
        let truncated: String = joined.chars().take(60).collect();
        format!("{}...", truncated)
    } else {
        joined
    }
}
