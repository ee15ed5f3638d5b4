//! Duplicate collapse for execution log partitions
//!
//! Retried or racing writers leave more than one record per logical trade
//! pair in the raw log. This module reduces one partition to exactly one
//! canonical record per `pair_id` and, when committing, swaps the result in
//! through the store's backed-up atomic replace.
//!
//! Known limitation: the commit is a read-snapshot-then-replace. A record
//! appended by a live producer between the snapshot read and the rename is
//! lost from the partition (it survives in the backup copy). Producers and
//! this batch job are separate processes, so closing the window needs an
//! advisory file lock or a producer quiescence pause; neither is done here.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::info;

use crate::store::{EventLogStore, ExecutionRecord, ExecutionStatus, PartitionKey, StoreError};

/// How the canonical record of one group was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Group had a single record
    Only,
    /// First record with success status, in file order
    FirstSuccess,
    /// No success present: the record with the highest timestamp. Among
    /// records tied on the maximum timestamp the first in file order wins;
    /// the rule is fixed so repeated runs cannot disagree.
    LatestTimestamp,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Selection::Only => "only record",
            Selection::FirstSuccess => "first success",
            Selection::LatestTimestamp => "latest timestamp",
        };
        f.write_str(s)
    }
}

/// One per distinct `pair_id`, describing the collapse of that group
#[derive(Debug, Clone)]
pub struct GroupDecision {
    pub pair_id: String,
    pub group_size: usize,
    pub selection: Selection,
}

/// Outcome of reconciling one partition
#[derive(Debug)]
pub struct ReconcileReport {
    pub partition: PartitionKey,
    /// Records read from the raw partition file
    pub total: usize,
    /// Distinct pair ids (equals the canonical record count)
    pub distinct: usize,
    /// Duplicate records dropped
    pub removed: usize,
    /// Unparseable lines skipped during the read
    pub skipped_lines: usize,
    /// Whether the canonical sequence was written back
    pub committed: bool,
    /// Backup file written before the commit, if any
    pub backup: Option<PathBuf>,
    pub decisions: Vec<GroupDecision>,
}

/// Collapse a record sequence to one canonical record per `pair_id`.
///
/// Output order follows the first appearance of each pair id, not the
/// position of the record that ends up selected. Selection per group: a
/// lone record stands; any success picks the first success in file order;
/// otherwise the highest timestamp wins, first-in-file-order among ties.
pub fn canonicalize(records: &[ExecutionRecord]) -> (Vec<ExecutionRecord>, Vec<GroupDecision>) {
    let mut key_order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();

    for (idx, record) in records.iter().enumerate() {
        groups
            .entry(record.pair_id.as_str())
            .or_insert_with(|| {
                key_order.push(record.pair_id.as_str());
                Vec::new()
            })
            .push(idx);
    }

    let mut canonical = Vec::with_capacity(key_order.len());
    let mut decisions = Vec::with_capacity(key_order.len());

    for pair_id in key_order {
        let members = &groups[pair_id];

        let (chosen, selection) = if members.len() == 1 {
            (members[0], Selection::Only)
        } else if let Some(&idx) = members
            .iter()
            .find(|&&idx| records[idx].status == ExecutionStatus::Success)
        {
            (idx, Selection::FirstSuccess)
        } else {
            let mut best = members[0];
            for &idx in &members[1..] {
                // Strictly greater keeps the earliest record among ties
                if records[idx].ts > records[best].ts {
                    best = idx;
                }
            }
            (best, Selection::LatestTimestamp)
        };

        canonical.push(records[chosen].clone());
        decisions.push(GroupDecision {
            pair_id: pair_id.to_string(),
            group_size: members.len(),
            selection,
        });
    }

    (canonical, decisions)
}

/// Reconcile one partition.
///
/// Reads the partition through the store, computes the canonical sequence
/// and reports counts and per-group decisions. With `dry_run` false the
/// canonical sequence is committed via the store's atomic replace with a
/// backup; a dry run mutates nothing. A missing partition file propagates
/// as [`StoreError::MissingPartition`] for the caller to skip.
pub fn reconcile(
    store: &EventLogStore,
    key: &PartitionKey,
    dry_run: bool,
) -> Result<ReconcileReport, StoreError> {
    let read = store.read_all(key)?;
    let (canonical, decisions) = canonicalize(&read.records);
    let removed = read.records.len() - canonical.len();

    let mut report = ReconcileReport {
        partition: key.clone(),
        total: read.records.len(),
        distinct: canonical.len(),
        removed,
        skipped_lines: read.skipped,
        committed: false,
        backup: None,
        decisions,
    };

    if !dry_run {
        report.backup = store.replace_atomically(key, &canonical, true)?;
        report.committed = true;
        info!(
            partition = %key,
            total = report.total,
            removed = report.removed,
            "Partition reconciled"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pair_id: &str, ts: i64, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord::new(pair_id, ts, status)
    }

    #[test]
    fn test_single_records_pass_through() {
        let input = vec![
            rec("A", 1, ExecutionStatus::Pending),
            rec("B", 2, ExecutionStatus::Failed),
        ];
        let (canonical, decisions) = canonicalize(&input);
        assert_eq!(canonical, input);
        assert!(decisions.iter().all(|d| d.selection == Selection::Only));
    }

    #[test]
    fn test_success_beats_later_timestamps() {
        let input = vec![
            rec("A", 1, ExecutionStatus::Pending),
            rec("A", 2, ExecutionStatus::Success),
            rec("A", 9, ExecutionStatus::Failed),
        ];
        let (canonical, decisions) = canonicalize(&input);
        assert_eq!(canonical, vec![rec("A", 2, ExecutionStatus::Success)]);
        assert_eq!(decisions[0].selection, Selection::FirstSuccess);
        assert_eq!(decisions[0].group_size, 3);
    }

    #[test]
    fn test_first_success_wins_among_several() {
        let input = vec![
            rec("A", 1, ExecutionStatus::Success),
            rec("A", 2, ExecutionStatus::Success),
        ];
        let (canonical, _) = canonicalize(&input);
        assert_eq!(canonical, vec![rec("A", 1, ExecutionStatus::Success)]);
    }

    #[test]
    fn test_no_success_selects_max_timestamp() {
        let input = vec![
            rec("A", 5, ExecutionStatus::Pending),
            rec("A", 9, ExecutionStatus::Failed),
            rec("A", 7, ExecutionStatus::Pending),
        ];
        let (canonical, decisions) = canonicalize(&input);
        assert_eq!(canonical, vec![rec("A", 9, ExecutionStatus::Failed)]);
        assert_eq!(decisions[0].selection, Selection::LatestTimestamp);
    }

    #[test]
    fn selection_prefers_first_among_tied_timestamps() {
        let first = rec("A", 9, ExecutionStatus::Failed).with_extra("writer", "w1".into());
        let second = rec("A", 9, ExecutionStatus::Pending).with_extra("writer", "w2".into());
        let input = vec![first.clone(), second];
        let (canonical, _) = canonicalize(&input);
        assert_eq!(canonical, vec![first]);
    }

    #[test]
    fn test_output_follows_first_seen_key_order() {
        let input = vec![
            rec("B", 1, ExecutionStatus::Pending),
            rec("A", 2, ExecutionStatus::Pending),
            rec("B", 3, ExecutionStatus::Success),
        ];
        let (canonical, _) = canonicalize(&input);
        let order: Vec<&str> = canonical.iter().map(|r| r.pair_id.as_str()).collect();
        assert_eq!(order, vec!["B", "A"]);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let input = vec![
            rec("A", 1, ExecutionStatus::Pending),
            rec("A", 2, ExecutionStatus::Success),
            rec("B", 3, ExecutionStatus::Failed),
        ];
        let (first_pass, _) = canonicalize(&input);
        let (second_pass, decisions) = canonicalize(&first_pass);
        assert_eq!(second_pass, first_pass);
        assert!(decisions.iter().all(|d| d.group_size == 1));
    }

    #[test]
    fn test_mixed_partition_collapse() {
        let input = vec![
            rec("A", 1, ExecutionStatus::Pending),
            rec("A", 2, ExecutionStatus::Success),
            rec("B", 3, ExecutionStatus::Failed),
        ];
        let (canonical, _) = canonicalize(&input);
        assert_eq!(
            canonical,
            vec![
                rec("A", 2, ExecutionStatus::Success),
                rec("B", 3, ExecutionStatus::Failed),
            ]
        );
        assert_eq!(input.len() - canonical.len(), 1);
    }
}
