//! Integration tests for the partitioned execution log store

use arbscribe::store::{EventLogStore, ExecutionRecord, ExecutionStatus, PartitionKey, StoreError};
use std::fs;
use tempfile::TempDir;

fn key(day: &str) -> PartitionKey {
    PartitionKey::parse(day).unwrap()
}

#[test]
fn append_then_read_preserves_records_in_file_order() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());
    let key = key("20260806");

    let first = ExecutionRecord::new("ETH-binance-kraken", 1754460000000, ExecutionStatus::Pending)
        .with_extra("exchange", "binance".into())
        .with_extra("qty", serde_json::json!(0.75));
    let second =
        ExecutionRecord::new("ETH-binance-kraken", 1754460000500, ExecutionStatus::Success);

    store.append(&key, &first).unwrap();
    store.append(&key, &second).unwrap();

    let read = store.read_all(&key).unwrap();
    assert_eq!(read.records, vec![first, second]);
    assert_eq!(read.skipped, 0);
}

#[test]
fn extra_fields_survive_a_full_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());
    let key = key("20260806");

    let record = ExecutionRecord::new("SOL-okx-bybit", 1754460001000, ExecutionStatus::Failed)
        .with_extra("symbol", "SOL/USDT".into())
        .with_extra("side", "sell".into())
        .with_extra("realizedPnl", serde_json::json!(-1.25))
        .with_extra("legs", serde_json::json!([{"exchange": "okx"}, {"exchange": "bybit"}]));

    store.append(&key, &record).unwrap();
    let read = store.read_all(&key).unwrap();
    assert_eq!(read.records, vec![record]);
}

#[test]
fn corrupt_lines_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());
    let key = key("20260806");
    let path = store.partition_path(&key);

    fs::write(
        &path,
        concat!(
            "{\"pairId\":\"A\",\"ts\":1,\"status\":\"pending\"}\n",
            "not json at all\n",
            "{\"pairId\":\"B\",\"ts\":2}\n",
            "{\"pairId\":\"C\",\"ts\":\"three\"}\n",
        ),
    )
    .unwrap();

    let read = store.read_all(&key).unwrap();
    assert_eq!(read.records.len(), 2);
    assert_eq!(read.skipped, 2);
    assert_eq!(read.records[0].pair_id, "A");
    // Absent status still parses, mapping to unknown
    assert_eq!(read.records[1].status, ExecutionStatus::Unknown);
}

#[test]
fn reading_a_missing_partition_is_a_typed_error() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());

    let err = store.read_all(&key("20260101")).unwrap_err();
    assert!(matches!(err, StoreError::MissingPartition(_)));
}

#[test]
fn replace_with_backup_copies_the_original_first() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());
    let key = key("20260806");

    store
        .append(&key, &ExecutionRecord::new("A", 1, ExecutionStatus::Pending))
        .unwrap();
    store
        .append(&key, &ExecutionRecord::new("A", 2, ExecutionStatus::Success))
        .unwrap();
    let original = fs::read_to_string(store.partition_path(&key)).unwrap();

    let canonical = vec![ExecutionRecord::new("A", 2, ExecutionStatus::Success)];
    let backup_path = store
        .replace_atomically(&key, &canonical, true)
        .unwrap()
        .expect("backup path");

    assert!(backup_path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("executions_20260806.jsonl.backup."));
    assert_eq!(fs::read_to_string(&backup_path).unwrap(), original);

    let read = store.read_all(&key).unwrap();
    assert_eq!(read.records, canonical);
}

#[test]
fn replace_without_backup_leaves_no_backup_artifact() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());
    let key = key("20260806");

    store
        .append(&key, &ExecutionRecord::new("A", 1, ExecutionStatus::Pending))
        .unwrap();
    let backup = store
        .replace_atomically(
            &key,
            &[ExecutionRecord::new("A", 1, ExecutionStatus::Pending)],
            false,
        )
        .unwrap();
    assert!(backup.is_none());

    let backups: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
        .collect();
    assert!(backups.is_empty());
}

#[test]
fn replace_on_a_new_partition_creates_the_file() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());
    let key = key("20260807");

    let records = vec![ExecutionRecord::new("A", 1, ExecutionStatus::Success)];
    let backup = store.replace_atomically(&key, &records, true).unwrap();
    assert!(backup.is_none());
    assert_eq!(store.read_all(&key).unwrap().records, records);
}

#[test]
fn list_partitions_returns_day_keys_sorted() {
    let dir = TempDir::new().unwrap();
    let store = EventLogStore::new(dir.path());

    for day in ["20260806", "20260804", "20260805"] {
        store
            .append(
                &key(day),
                &ExecutionRecord::new("A", 1, ExecutionStatus::Pending),
            )
            .unwrap();
    }

    let keys: Vec<String> = store
        .list_partitions()
        .unwrap()
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(keys, vec!["20260804", "20260805", "20260806"]);
}
