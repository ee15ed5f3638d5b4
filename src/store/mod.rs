//! Append-only execution log storage
//!
//! One file per calendar day under the executions directory, named
//! `executions_<YYYYMMDD>.jsonl`, one JSON object per line. Partitions are
//! fully independent: appends, reads and reconciliation never cross a day
//! boundary. The parallel `net_value_<YYYYMMDD>.jsonl` files written next to
//! these by the balance snapshotter follow the same line-delimited
//! convention but are not read here.

mod record;

pub use record::{ExecutionRecord, ExecutionStatus};

use chrono::{NaiveDate, Utc};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Partition file name pieces: `executions_<YYYYMMDD>.jsonl`
const PARTITION_PREFIX: &str = "executions_";
const PARTITION_SUFFIX: &str = ".jsonl";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("partition file not found: {}", .0.display())]
    MissingPartition(PathBuf),
    #[error("invalid partition key '{0}': expected YYYYMMDD")]
    InvalidKey(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record encoding error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Day key identifying one log partition, always eight digits (`YYYYMMDD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Parse and validate a `YYYYMMDD` string
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .map_err(|_| StoreError::InvalidKey(s.to_string()))?;
        Ok(Self(s.to_string()))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y%m%d").to_string())
    }

    /// Key for the current UTC day
    pub fn today() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    /// Recover a key from a partition file name (`executions_<key>.jsonl`)
    pub fn from_file_name(name: &str) -> Option<Self> {
        let key = name
            .strip_prefix(PARTITION_PREFIX)?
            .strip_suffix(PARTITION_SUFFIX)?;
        Self::parse(key).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}{}{}", PARTITION_PREFIX, self.0, PARTITION_SUFFIX)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of reading one partition: records in file (append) order plus the
/// number of lines that could not be parsed and were skipped.
#[derive(Debug, Default)]
pub struct PartitionRead {
    pub records: Vec<ExecutionRecord>,
    pub skipped: usize,
}

/// File-backed append-only store for execution records.
///
/// Records are immutable once appended; the only destructive operation is
/// [`EventLogStore::replace_atomically`], which reconciliation uses to swap
/// in a canonical record set behind a backup copy.
#[derive(Debug, Clone)]
pub struct EventLogStore {
    dir: PathBuf,
}

impl EventLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of one partition file
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Append one record as a single JSON line, creating the file (and the
    /// executions directory) if absent. Write failures surface to the
    /// caller; there is no retry here.
    pub fn append(&self, key: &PartitionKey, record: &ExecutionRecord) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let line = serde_json::to_string(record)?;

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.partition_path(key))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Read every record of one partition in file order.
    ///
    /// A line that fails to parse is logged and counted, never fatal: one
    /// corrupt write must not hide the rest of the day. A missing file is
    /// the typed [`StoreError::MissingPartition`] so batch callers can skip
    /// the partition and continue with its siblings.
    pub fn read_all(&self, key: &PartitionKey) -> Result<PartitionRead, StoreError> {
        let path = self.partition_path(key);
        if !path.exists() {
            return Err(StoreError::MissingPartition(path));
        }

        let file = fs::File::open(&path)?;
        let reader = BufReader::new(file);

        let mut result = PartitionRead::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionRecord>(&line) {
                Ok(record) => result.records.push(record),
                Err(e) => {
                    warn!(
                        partition = %key,
                        line = line_no + 1,
                        error = %e,
                        "Skipping unparseable log line"
                    );
                    result.skipped += 1;
                }
            }
        }

        debug!(
            partition = %key,
            records = result.records.len(),
            skipped = result.skipped,
            "Partition read"
        );
        Ok(result)
    }

    /// Replace one partition's contents with `records`, one per line.
    ///
    /// With `backup` set, the live file is first copied to
    /// `<file>.backup.<unix-epoch-seconds>`; a backup failure aborts before
    /// anything destructive happens. The overwrite itself is written to a
    /// temp file in the same directory and renamed over the original.
    ///
    /// Returns the backup path when one was written.
    pub fn replace_atomically(
        &self,
        key: &PartitionKey,
        records: &[ExecutionRecord],
        backup: bool,
    ) -> Result<Option<PathBuf>, StoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.partition_path(key);

        let backup_path = if backup && path.exists() {
            let backup_path =
                PathBuf::from(format!("{}.backup.{}", path.display(), Utc::now().timestamp()));
            fs::copy(&path, &backup_path)?;
            debug!(partition = %key, backup = %backup_path.display(), "Partition backed up");
            Some(backup_path)
        } else {
            None
        };

        let tmp_path = path.with_extension("jsonl.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            for record in records {
                let line = serde_json::to_string(record)?;
                writeln!(tmp, "{}", line)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        Ok(backup_path)
    }

    /// List every partition present in the executions directory, sorted by
    /// day key. Files that do not match the partition naming pattern
    /// (backups, temp files, net-value snapshots) are ignored.
    pub fn list_partitions(&self) -> Result<Vec<PartitionKey>, StoreError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(key) = PartitionKey::from_file_name(name) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
