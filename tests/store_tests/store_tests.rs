//! Tests for the store handle
//!
//! These tests verify:
//! - Rollback of uncommitted map changes
//! - Crash recovery: torn logs are discarded, committed logs replayed
//! - Dropping a store without close behaves like a crash
//! - Close semantics and use after close
//! - Read-only stores and disabled transactions
//! - Invalidation of map handles created in a rolled-back transaction
//! - Raw record access and concurrent use through cloned handles

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::thread;

use pagekv::recman::log_path;
use pagekv::wal::LogWriter;
use pagekv::{BincodeSerializer, DefaultSerializer, HTreeMap, Options, Store, StoreError};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

const PAGE: usize = 4096;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.db");
    (temp_dir, path)
}

fn options() -> Options {
    Options::builder().page_size(PAGE as u32).build()
}

fn open_store(path: &Path) -> Store {
    Store::open(path, options()).unwrap()
}

fn create_map(store: &Store, name: &str) -> HTreeMap<i64, String> {
    store
        .create_hash_map(name, DefaultSerializer::new(), DefaultSerializer::new())
        .unwrap()
}

fn open_map(store: &Store, name: &str) -> HTreeMap<i64, String> {
    store
        .open_map(name, DefaultSerializer::new(), DefaultSerializer::new())
        .unwrap()
}

fn put_range(map: &HTreeMap<i64, String>, range: std::ops::Range<i64>) {
    for i in range {
        map.put(&i, &format!("aa{}", i)).unwrap();
    }
}

fn present_keys(map: &HTreeMap<i64, String>, range: std::ops::Range<i64>) -> Vec<i64> {
    range.filter(|i| map.get(i).unwrap().is_some()).collect()
}

/// Pages of `after` that differ from `before`, as log frames
fn changed_pages(before: &[u8], after: &[u8]) -> Vec<(u64, Vec<u8>)> {
    after
        .chunks(PAGE)
        .enumerate()
        .filter(|(page_no, image)| {
            let start = page_no * PAGE;
            before.get(start..start + PAGE) != Some(*image)
        })
        .map(|(page_no, image)| (page_no as u64, image.to_vec()))
        .collect()
}

fn write_log(path: &Path, frames: &[(u64, Vec<u8>)]) -> u64 {
    let frames: Vec<(u64, &[u8])> = frames
        .iter()
        .map(|(page_no, image)| (*page_no, &image[..]))
        .collect();
    let mut writer = LogWriter::open(&log_path(path)).unwrap();
    writer.write_transaction(&frames).unwrap()
}

/// Store with keys 0..10 committed, plus the page images a commit of keys
/// 10..20 would write. The main file is left holding only the first batch.
fn store_with_pending_commit(path: &Path) -> Vec<(u64, Vec<u8>)> {
    let store = open_store(path);
    let map = create_map(&store, "crash");
    put_range(&map, 0..10);
    store.commit().unwrap();
    let first = std::fs::read(path).unwrap();

    put_range(&map, 10..20);
    store.commit().unwrap();
    let second = std::fs::read(path).unwrap();
    drop(map);
    drop(store);

    std::fs::write(path, &first).unwrap();
    changed_pages(&first, &second)
}

// =============================================================================
// Rollback Tests
// =============================================================================

#[test]
fn test_rollback_discards_uncommitted_entries() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    let map = create_map(&store, "rb");

    put_range(&map, 0..100);
    store.commit().unwrap();
    put_range(&map, 100..200);
    map.remove(&5).unwrap();
    store.rollback().unwrap();

    assert_eq!(map.len().unwrap(), 100);
    assert_eq!(present_keys(&map, 0..200), (0..100).collect::<Vec<_>>());
    assert_eq!(map.get(&5).unwrap().as_deref(), Some("aa5"));

    // The map keeps working after the rollback
    put_range(&map, 100..110);
    store.commit().unwrap();
    assert_eq!(map.len().unwrap(), 110);
}

#[test]
fn test_map_created_in_rolled_back_transaction_is_invalid() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    let kept = create_map(&store, "kept");
    store.commit().unwrap();

    let doomed = create_map(&store, "doomed");
    doomed.put(&1, &"x".to_string()).unwrap();
    store.rollback().unwrap();

    assert!(matches!(doomed.get(&1), Err(StoreError::Precondition(_))));
    assert!(matches!(
        doomed.put(&2, &"y".to_string()),
        Err(StoreError::Precondition(_))
    ));
    assert!(matches!(
        doomed.entries().next(),
        Some(Err(StoreError::Precondition(_)))
    ));
    assert_eq!(store.named_root("doomed").unwrap(), None);

    // Maps from earlier transactions are unaffected
    kept.put(&1, &"fine".to_string()).unwrap();
    assert!(!store.is_poisoned());

    // The name can be reused
    let again = create_map(&store, "doomed");
    again.put(&1, &"z".to_string()).unwrap();
    store.commit().unwrap();
    assert_eq!(again.get(&1).unwrap().as_deref(), Some("z"));
}

#[test]
fn test_rollback_unavailable_without_log() {
    let (_temp, path) = setup_temp_store();
    let options = Options::builder()
        .page_size(PAGE as u32)
        .transaction_disable(true)
        .build();
    {
        let store = Store::open(&path, options.clone()).unwrap();
        let map = create_map(&store, "nolog");
        put_range(&map, 0..50);
        assert!(matches!(store.rollback(), Err(StoreError::Precondition(_))));
        store.close().unwrap();
    }

    let store = Store::open(&path, options).unwrap();
    assert_eq!(open_map(&store, "nolog").len().unwrap(), 50);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_torn_log_is_discarded() {
    let (_temp, path) = setup_temp_store();
    let frames = store_with_pending_commit(&path);
    assert!(!frames.is_empty());

    // Half the frames made it to the log before the crash
    let half = &frames[..frames.len() / 2];
    let frames_len = (half.len() * (8 + PAGE)) as u64;
    write_log(&path, half);
    let log = OpenOptions::new().write(true).open(log_path(&path)).unwrap();
    log.set_len(frames_len).unwrap();
    drop(log);

    let store = open_store(&path);
    let map = open_map(&store, "crash");
    assert_eq!(present_keys(&map, 0..20), (0..10).collect::<Vec<_>>());
    assert_eq!(std::fs::metadata(log_path(&path)).unwrap().len(), 0);
    assert!(store.check_integrity().unwrap().is_ok());
}

#[test]
fn test_log_cut_mid_frame_is_discarded() {
    let (_temp, path) = setup_temp_store();
    let frames = store_with_pending_commit(&path);

    let written = write_log(&path, &frames);
    let log = OpenOptions::new().write(true).open(log_path(&path)).unwrap();
    log.set_len(written / 2).unwrap();
    drop(log);

    let store = open_store(&path);
    let map = open_map(&store, "crash");
    assert_eq!(map.len().unwrap(), 10);
}

#[test]
fn test_committed_log_is_replayed() {
    let (_temp, path) = setup_temp_store();
    let frames = store_with_pending_commit(&path);

    // The crash hit after the log was synced but before the main file was
    write_log(&path, &frames);

    let store = open_store(&path);
    let map = open_map(&store, "crash");
    assert_eq!(present_keys(&map, 0..20), (0..20).collect::<Vec<_>>());
    assert_eq!(map.get(&15).unwrap().as_deref(), Some("aa15"));
    assert!(store.check_integrity().unwrap().is_ok());
}

#[test]
fn test_readonly_refuses_pending_log() {
    let (_temp, path) = setup_temp_store();
    let frames = store_with_pending_commit(&path);
    write_log(&path, &frames);

    let readonly = Options::builder().readonly(true).build();
    assert!(matches!(
        Store::open(&path, readonly),
        Err(StoreError::Precondition(_))
    ));
}

#[test]
fn test_drop_without_close_loses_open_transaction() {
    let (_temp, path) = setup_temp_store();
    {
        let store = open_store(&path);
        let map = create_map(&store, "drop");
        put_range(&map, 0..10);
        store.commit().unwrap();
        put_range(&map, 10..20);
    }

    let store = open_store(&path);
    let map = open_map(&store, "drop");
    assert_eq!(present_keys(&map, 0..20), (0..10).collect::<Vec<_>>());
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_commits_pending_work() {
    let (_temp, path) = setup_temp_store();
    {
        let store = open_store(&path);
        let map = create_map(&store, "closing");
        put_range(&map, 0..25);
        store.close().unwrap();
    }

    let store = open_store(&path);
    assert_eq!(open_map(&store, "closing").len().unwrap(), 25);
}

#[test]
fn test_use_after_close() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    let map = create_map(&store, "late");
    let other = store.clone();

    store.close().unwrap();
    assert!(other.is_closed());
    // closing twice is fine
    other.close().unwrap();

    assert!(matches!(map.get(&1), Err(StoreError::Precondition(_))));
    assert!(matches!(store.commit(), Err(StoreError::Precondition(_))));
    assert!(matches!(other.rollback(), Err(StoreError::Precondition(_))));
    assert!(matches!(
        store.named_root("late"),
        Err(StoreError::Precondition(_))
    ));
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_readonly_store() {
    let (_temp, path) = setup_temp_store();
    {
        let store = open_store(&path);
        put_range(&create_map(&store, "ro"), 0..5);
        store.close().unwrap();
    }

    let store = Store::open(&path, Options::builder().readonly(true).build()).unwrap();
    let map = open_map(&store, "ro");
    assert_eq!(map.get(&3).unwrap().as_deref(), Some("aa3"));
    assert_eq!(map.entries().count(), 5);

    assert!(matches!(
        map.put(&9, &"no".to_string()),
        Err(StoreError::Precondition(_))
    ));
    assert!(matches!(
        store.create_hash_map::<i64, String, _, _>("new", DefaultSerializer::new(), DefaultSerializer::new()),
        Err(StoreError::Precondition(_))
    ));
    store.commit().unwrap();
    store.close().unwrap();
}

// =============================================================================
// Raw Record Tests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

#[test]
fn test_raw_records_through_store() {
    let (_temp, path) = setup_temp_store();
    let serializer = BincodeSerializer::<Account>::new();
    let store = open_store(&path);

    let mut account = Account {
        owner: "ada".to_string(),
        balance: 10,
    };
    let recid = store.insert(&account, &serializer).unwrap();
    store.set_named_root("account", recid).unwrap();

    account.balance = -3;
    store.update(recid, &account, &serializer).unwrap();
    store.close().unwrap();

    let store = open_store(&path);
    let recid = store.named_root("account").unwrap().unwrap();
    assert_eq!(store.fetch::<Account>(recid, &serializer).unwrap(), Some(account));

    store.delete(recid).unwrap();
    assert_eq!(store.fetch::<Account>(recid, &serializer).unwrap(), None);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_through_clones() {
    let (_temp, path) = setup_temp_store();
    let store = open_store(&path);
    let map = create_map(&store, "threads");

    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let map = map.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    let key = t * 1000 + i;
                    map.put(&key, &format!("aa{}", key)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    store.commit().unwrap();

    assert_eq!(map.len().unwrap(), 1000);
    assert_eq!(map.get(&3249).unwrap().as_deref(), Some("aa3249"));
    map.verify().unwrap();
}
