//! Partition follower: bridges the append-only log to the hub
//!
//! In production the execution engine publishes each event to the hub as it
//! appends the record. When this process runs standalone, the follower
//! reproduces that wiring by tailing the partition file: every complete new
//! line is validated and broadcast to the connected subscribers.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::{EventLogStore, ExecutionRecord, PartitionKey};

use super::BroadcastHub;

/// Which partition the follower tails
#[derive(Debug, Clone)]
pub enum FollowTarget {
    /// Tail the current UTC day, rolling over to the new file at midnight
    Today,
    /// Tail one fixed partition
    Fixed(PartitionKey),
}

impl FollowTarget {
    fn current_key(&self) -> PartitionKey {
        match self {
            FollowTarget::Today => PartitionKey::today(),
            FollowTarget::Fixed(key) => key.clone(),
        }
    }
}

/// Tails a partition file and broadcasts appended records
pub struct PartitionFollower {
    store: EventLogStore,
    hub: Arc<BroadcastHub>,
    target: FollowTarget,
    poll_interval: Duration,
}

impl PartitionFollower {
    pub fn new(
        store: EventLogStore,
        hub: Arc<BroadcastHub>,
        target: FollowTarget,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            target,
            poll_interval,
        }
    }

    /// Poll the partition file until shutdown. The file not existing yet is
    /// normal (no executions today); it is picked up once the producer
    /// creates it.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut key = self.target.current_key();
        let mut offset: u64 = 0;
        info!(partition = %key, "Following partition file");

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = self.target.current_key();
                    if current != key {
                        info!(from = %key, to = %current, "Rolling to new partition");
                        key = current;
                        offset = 0;
                    }

                    let path = self.store.partition_path(&key);
                    match read_new_lines(&path, offset) {
                        Ok((lines, new_offset)) => {
                            offset = new_offset;
                            for line in lines {
                                self.publish(&key, &line).await;
                            }
                        }
                        Err(e) => {
                            warn!(partition = %key, error = %e, "Failed to poll partition file");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(partition = %key, "Follower shutting down");
                    break;
                }
            }
        }
    }

    async fn publish(&self, key: &PartitionKey, line: &str) {
        // Validate before fanning out; the raw line is the payload so the
        // subscriber sees exactly what the producer wrote
        match serde_json::from_str::<ExecutionRecord>(line) {
            Ok(record) => {
                debug!(partition = %key, pair_id = %record.pair_id, "Publishing appended record");
                self.hub.broadcast(line).await;
            }
            Err(e) => {
                warn!(partition = %key, error = %e, "Skipping unparseable appended line");
            }
        }
    }
}

/// Read the complete lines appended to `path` since `offset`.
///
/// Only data up to the last newline is consumed; a partially written final
/// line stays pending for the next poll. A file that shrank below the
/// offset (reconciliation replaced it) is re-read from the start.
fn read_new_lines(path: &Path, offset: u64) -> std::io::Result<(Vec<String>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }

    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let mut offset = offset;
    if len < offset {
        offset = 0;
    }
    if len == offset {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;

    let consumed = match buf.rfind('\n') {
        Some(pos) => pos + 1,
        None => return Ok((Vec::new(), offset)),
    };

    let lines = buf[..consumed]
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    Ok((lines, offset + consumed as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_new_lines_ignores_partial_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("executions_20260806.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"b\":2}\n{\"c\":").unwrap();

        let (lines, offset) = read_new_lines(&path, 0).unwrap();
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);

        // Complete the partial line and read again from the new offset
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "3}}").unwrap();
        let (lines, _) = read_new_lines(&path, offset).unwrap();
        assert_eq!(lines, vec!["{\"c\":3}"]);
    }

    #[test]
    fn test_read_new_lines_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("executions_20260806.jsonl");
        let (lines, offset) = read_new_lines(&path, 42).unwrap();
        assert!(lines.is_empty());
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_read_new_lines_resets_after_truncation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("executions_20260806.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"b\":2}\n").unwrap();
        let (_, offset) = read_new_lines(&path, 0).unwrap();

        // Reconciliation shrank the file
        std::fs::write(&path, "{\"a\":1}\n").unwrap();
        let (lines, new_offset) = read_new_lines(&path, offset).unwrap();
        assert_eq!(lines, vec!["{\"a\":1}"]);
        assert_eq!(new_offset, 8);
    }
}
