//! Tests for the record manager
//!
//! These tests verify:
//! - Recid allocation, stability and reuse
//! - Free-list consistency after random insert/delete/commit sequences
//! - Oversized records stored in overflow chains
//! - Named roots
//! - Payload compression
//! - Persistence, read-only mode, rollback and poisoning

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pagekv::recman::log_path;
use pagekv::{Compression, DefaultSerializer, Options, RecordManager, StoreError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("records.db");
    (temp_dir, path)
}

fn small_pages() -> Options {
    Options::builder().page_size(1024).cache_pages(64).build()
}

fn open(path: &Path) -> RecordManager {
    RecordManager::open(path, &small_pages()).unwrap()
}

/// Deterministic pseudo-random sequence (64-bit LCG)
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn payload(seed: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seed as usize + i * 31) as u8).collect()
}

fn assert_integrity(recman: &mut RecordManager) {
    let report = recman.check_integrity().unwrap();
    assert!(report.is_ok(), "integrity problems: {:?}", report.problems);
}

// =============================================================================
// Basic Record Tests
// =============================================================================

#[test]
fn test_recids_start_at_one_and_ascend() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);

    let a = recman.insert_bytes(b"a").unwrap();
    let b = recman.insert_bytes(b"b").unwrap();
    let c = recman.insert_bytes(b"").unwrap();
    assert_eq!((a, b, c), (1, 2, 3));

    assert_eq!(recman.fetch_bytes(b).unwrap(), Some(b"b".to_vec()));
    assert_eq!(recman.fetch_bytes(c).unwrap(), Some(Vec::new()));
}

#[test]
fn test_typed_records() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    let serializer = DefaultSerializer::new();

    let recid = recman.insert(&"hello".to_string(), &serializer).unwrap();
    recman.update(recid, &"goodbye".to_string(), &serializer).unwrap();

    let value: Option<String> = recman.fetch(recid, &serializer).unwrap();
    assert_eq!(value.as_deref(), Some("goodbye"));
}

#[test]
fn test_unknown_recid_is_precondition() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    recman.insert_bytes(b"x").unwrap();

    for recid in [0, 2, 1 << 40] {
        assert!(
            matches!(recman.fetch_bytes(recid), Err(StoreError::Precondition(_))),
            "recid {}",
            recid
        );
    }
    assert!(matches!(
        recman.update_bytes(77, b"y"),
        Err(StoreError::Precondition(_))
    ));
    assert!(!recman.is_poisoned());
}

#[test]
fn test_deleted_recid_behaviour() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    let recid = recman.insert_bytes(b"doomed").unwrap();
    recman.delete(recid).unwrap();

    assert_eq!(recman.fetch_bytes(recid).unwrap(), None);
    assert!(matches!(
        recman.update_bytes(recid, b"again"),
        Err(StoreError::Precondition(_))
    ));
    assert!(matches!(
        recman.delete(recid),
        Err(StoreError::Precondition(_))
    ));
}

#[test]
fn test_recid_stable_across_growth() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);

    let recid = recman.insert_bytes(&payload(1, 10)).unwrap();
    let others: Vec<u64> = (0..20)
        .map(|i| recman.insert_bytes(&payload(i, 200)).unwrap())
        .collect();

    for len in [50, 400, 900, 3000, 20, 0, 5000] {
        let data = payload(len as u64, len);
        recman.update_bytes(recid, &data).unwrap();
        assert_eq!(recman.fetch_bytes(recid).unwrap(), Some(data));
    }
    for (i, other) in others.iter().enumerate() {
        assert_eq!(
            recman.fetch_bytes(*other).unwrap(),
            Some(payload(i as u64, 200))
        );
    }
    assert_integrity(&mut recman);
}

// =============================================================================
// Free List Tests
// =============================================================================

#[test]
fn test_random_churn_keeps_free_lists_consistent() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    let mut rng = Lcg(7);
    let mut live: BTreeMap<u64, Vec<u8>> = BTreeMap::new();

    for round in 0..2000u64 {
        match rng.below(10) {
            0..=4 => {
                let data = payload(round, rng.below(1500) as usize);
                let recid = recman.insert_bytes(&data).unwrap();
                assert!(live.insert(recid, data).is_none(), "recid {} handed out twice", recid);
            }
            5..=6 if !live.is_empty() => {
                let pick = rng.below(live.len() as u64) as usize;
                let recid = *live.keys().nth(pick).unwrap();
                let data = payload(round, rng.below(700) as usize);
                recman.update_bytes(recid, &data).unwrap();
                live.insert(recid, data);
            }
            7..=8 if !live.is_empty() => {
                let pick = rng.below(live.len() as u64) as usize;
                let recid = *live.keys().nth(pick).unwrap();
                recman.delete(recid).unwrap();
                live.remove(&recid);
            }
            _ => recman.commit().unwrap(),
        }

        if round % 250 == 0 {
            assert_integrity(&mut recman);
        }
    }

    recman.commit().unwrap();
    let report = recman.check_integrity().unwrap();
    assert!(report.is_ok(), "integrity problems: {:?}", report.problems);
    assert_eq!(report.live_records, live.len() as u64);

    for (recid, data) in &live {
        assert_eq!(recman.fetch_bytes(*recid).unwrap().as_ref(), Some(data));
    }
}

#[test]
fn test_deleted_recids_are_reused() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);

    let recids: Vec<u64> = (0..10).map(|i| recman.insert_bytes(&[i]).unwrap()).collect();
    recman.delete(recids[3]).unwrap();
    recman.delete(recids[7]).unwrap();

    // Most recently freed first
    assert_eq!(recman.insert_bytes(b"p").unwrap(), recids[7]);
    assert_eq!(recman.insert_bytes(b"q").unwrap(), recids[3]);
    assert_eq!(recman.insert_bytes(b"r").unwrap(), 11);
    assert_integrity(&mut recman);
}

#[test]
fn test_freed_pages_are_recycled() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);

    let recids: Vec<u64> = (0..30)
        .map(|i| recman.insert_bytes(&payload(i, 900)).unwrap())
        .collect();
    recman.commit().unwrap();
    let grown = recman.page_count();

    for recid in &recids {
        recman.delete(*recid).unwrap();
    }
    recman.commit().unwrap();
    let report = recman.check_integrity().unwrap();
    assert!(report.free_physical_pages > 0);

    for i in 0..30 {
        recman.insert_bytes(&payload(i, 900)).unwrap();
    }
    recman.commit().unwrap();
    assert_eq!(recman.page_count(), grown, "file grew although free pages existed");
    assert_integrity(&mut recman);
}

// =============================================================================
// Oversized Record Tests
// =============================================================================

#[test]
fn test_oversized_record_uses_overflow_chain() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);

    let big = payload(3, 10_000);
    let recid = recman.insert_bytes(&big).unwrap();
    assert_eq!(recman.fetch_bytes(recid).unwrap(), Some(big.clone()));

    let report = recman.check_integrity().unwrap();
    assert!(report.is_ok(), "{:?}", report.problems);
    // 10000 bytes in chunks of 1004
    assert_eq!(report.overflow_pages, 10);

    // Shrinking releases the chain
    recman.update_bytes(recid, b"tiny").unwrap();
    let report = recman.check_integrity().unwrap();
    assert_eq!(report.overflow_pages, 0);
    assert!(report.is_ok(), "{:?}", report.problems);

    recman.delete(recid).unwrap();
    assert_integrity(&mut recman);
}

#[test]
fn test_oversized_record_survives_reopen() {
    let (_temp, path) = setup_temp_store();
    let big = payload(9, 64 * 1024);
    let recid = {
        let mut recman = open(&path);
        let recid = recman.insert_bytes(&big).unwrap();
        recman.close().unwrap();
        recid
    };

    let mut recman = open(&path);
    assert_eq!(recman.fetch_bytes(recid).unwrap(), Some(big));
}

// =============================================================================
// Named Root Tests
// =============================================================================

#[test]
fn test_named_roots_persist() {
    let (_temp, path) = setup_temp_store();
    {
        let mut recman = open(&path);
        assert_eq!(recman.named_root("users").unwrap(), None);
        recman.set_named_root("users", 12).unwrap();
        recman.set_named_root("orders", 40).unwrap();
        recman.set_named_root("tmp", 3).unwrap();
        recman.set_named_root("tmp", 0).unwrap();
        recman.close().unwrap();
    }

    let mut recman = open(&path);
    assert_eq!(recman.named_root("users").unwrap(), Some(12));
    assert_eq!(recman.named_root("tmp").unwrap(), None);
    assert_eq!(
        recman.named_roots().unwrap(),
        vec![("orders".to_string(), 40), ("users".to_string(), 12)]
    );
}

#[test]
fn test_named_root_rolled_back() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    recman.set_named_root("kept", 1).unwrap();
    recman.commit().unwrap();

    recman.set_named_root("lost", 2).unwrap();
    recman.set_named_root("kept", 5).unwrap();
    recman.rollback().unwrap();

    assert_eq!(recman.named_root("lost").unwrap(), None);
    assert_eq!(recman.named_root("kept").unwrap(), Some(1));
}

// =============================================================================
// Compression Tests
// =============================================================================

fn compression_roundtrip(codec: Compression) {
    let (_temp, path) = setup_temp_store();
    let options = Options::builder()
        .page_size(1024)
        .compression(codec)
        .build();

    let repetitive = vec![b'z'; 20_000];
    let noisy: Vec<u8> = {
        let mut rng = Lcg(99);
        (0..300).map(|_| rng.next() as u8).collect()
    };

    let (a, b) = {
        let mut recman = RecordManager::open(&path, &options).unwrap();
        assert_eq!(recman.compression(), codec);
        let a = recman.insert_bytes(&repetitive).unwrap();
        let b = recman.insert_bytes(&noisy).unwrap();
        let report = recman.check_integrity().unwrap();
        // 20 KB of one byte compresses to well under a page
        assert_eq!(report.overflow_pages, 0, "{:?} did not compress", codec);
        recman.close().unwrap();
        (a, b)
    };

    // The stored codec wins over the requested one
    let mut recman = RecordManager::open(&path, &small_pages()).unwrap();
    assert_eq!(recman.compression(), codec);
    assert_eq!(recman.fetch_bytes(a).unwrap(), Some(repetitive));
    assert_eq!(recman.fetch_bytes(b).unwrap(), Some(noisy));
}

#[test]
fn test_lz4_compression() {
    compression_roundtrip(Compression::Lz4);
}

#[test]
fn test_deflate_compression() {
    compression_roundtrip(Compression::Deflate);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_committed_records_survive_reopen() {
    let (_temp, path) = setup_temp_store();
    let recids: Vec<u64> = {
        let mut recman = open(&path);
        let recids = (0..100)
            .map(|i| recman.insert_bytes(&payload(i, 50 + i as usize)).unwrap())
            .collect();
        recman.close().unwrap();
        recids
    };

    let mut recman = open(&path);
    for (i, recid) in recids.iter().enumerate() {
        assert_eq!(
            recman.fetch_bytes(*recid).unwrap(),
            Some(payload(i as u64, 50 + i))
        );
    }
    assert_integrity(&mut recman);
}

#[test]
fn test_drop_without_close_loses_open_transaction() {
    let (_temp, path) = setup_temp_store();
    {
        let mut recman = open(&path);
        recman.insert_bytes(b"committed").unwrap();
        recman.commit().unwrap();
        recman.insert_bytes(b"pending").unwrap();
        // dropped here, like a crash
    }

    let mut recman = open(&path);
    assert_eq!(recman.fetch_bytes(1).unwrap(), Some(b"committed".to_vec()));
    assert!(matches!(
        recman.fetch_bytes(2),
        Err(StoreError::Precondition(_))
    ));
}

#[test]
fn test_stored_page_size_wins() {
    let (_temp, path) = setup_temp_store();
    open(&path).close().unwrap();

    let options = Options::builder().page_size(4096).build();
    let recman = RecordManager::open(&path, &options).unwrap();
    assert_eq!(recman.page_size(), 1024);
}

#[test]
fn test_invalid_options_rejected() {
    let (_temp, path) = setup_temp_store();
    for options in [
        Options::builder().page_size(1000).build(),
        Options::builder().page_size(512).build(),
        Options::builder().page_size(64 * 1024).build(),
        Options::builder().cache_pages(2).build(),
    ] {
        assert!(matches!(
            RecordManager::open(&path, &options),
            Err(StoreError::Config(_))
        ));
    }
    assert!(!path.exists());
}

// =============================================================================
// Read-only Tests
// =============================================================================

#[test]
fn test_readonly_rejects_mutation() {
    let (_temp, path) = setup_temp_store();
    {
        let mut recman = open(&path);
        recman.insert_bytes(b"frozen").unwrap();
        recman.close().unwrap();
    }

    let options = Options::builder().readonly(true).build();
    let mut recman = RecordManager::open(&path, &options).unwrap();
    assert!(recman.is_readonly());
    assert_eq!(recman.fetch_bytes(1).unwrap(), Some(b"frozen".to_vec()));

    assert!(matches!(recman.insert_bytes(b"x"), Err(StoreError::Precondition(_))));
    assert!(matches!(recman.update_bytes(1, b"x"), Err(StoreError::Precondition(_))));
    assert!(matches!(recman.delete(1), Err(StoreError::Precondition(_))));
    assert!(matches!(
        recman.set_named_root("n", 1),
        Err(StoreError::Precondition(_))
    ));
    recman.commit().unwrap();
    assert!(!recman.is_poisoned());
    recman.close().unwrap();
}

#[test]
fn test_readonly_cannot_create() {
    let (_temp, path) = setup_temp_store();
    let options = Options::builder().readonly(true).build();
    assert!(matches!(
        RecordManager::open(&path, &options),
        Err(StoreError::Precondition(_))
    ));
    assert!(!path.exists());
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_rollback_restores_records_and_recids() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    let kept = recman.insert_bytes(b"kept").unwrap();
    recman.commit().unwrap();
    let txn = recman.txn_id();

    recman.update_bytes(kept, &payload(1, 3000)).unwrap();
    let discarded = recman.insert_bytes(b"discarded").unwrap();
    recman.rollback().unwrap();

    assert!(recman.was_rolled_back(txn));
    assert!(recman.txn_id() > txn);
    assert_eq!(recman.fetch_bytes(kept).unwrap(), Some(b"kept".to_vec()));
    // The discarded recid is handed out again
    assert_eq!(recman.insert_bytes(b"again").unwrap(), discarded);
    assert_integrity(&mut recman);
}

#[test]
fn test_rollback_requires_log() {
    let (_temp, path) = setup_temp_store();
    let options = Options::builder()
        .page_size(1024)
        .transaction_disable(true)
        .build();
    let mut recman = RecordManager::open(&path, &options).unwrap();
    assert!(!recman.transactions_enabled());

    recman.insert_bytes(b"direct").unwrap();
    assert!(matches!(recman.rollback(), Err(StoreError::Precondition(_))));
    recman.close().unwrap();
    assert!(!log_path(&path).exists());

    let mut recman = RecordManager::open(&path, &options).unwrap();
    assert_eq!(recman.fetch_bytes(1).unwrap(), Some(b"direct".to_vec()));
}

#[test]
fn test_log_is_empty_after_commit() {
    let (_temp, path) = setup_temp_store();
    let mut recman = open(&path);
    recman.insert_bytes(&payload(0, 500)).unwrap();
    recman.commit().unwrap();

    assert_eq!(std::fs::metadata(log_path(&path)).unwrap().len(), 0);
}

// =============================================================================
// Poisoning Tests
// =============================================================================

/// Overwrite the type tag of the first data page in the file
fn corrupt_first_data_page(path: &Path, page_size: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    let page_no = (1..bytes.len() / page_size)
        .find(|&page_no| bytes[page_no * page_size] == 2)
        .expect("no data page in file");
    bytes[page_no * page_size] = 0x63;
    std::fs::write(path, &bytes).unwrap();
}

#[test]
fn test_corruption_poisons_until_reopen() {
    let (_temp, path) = setup_temp_store();
    {
        let mut recman = open(&path);
        recman.insert_bytes(b"victim").unwrap();
        recman.close().unwrap();
    }
    corrupt_first_data_page(&path, 1024);

    let mut recman = open(&path);
    assert!(matches!(
        recman.fetch_bytes(1),
        Err(StoreError::Corruption(_))
    ));
    assert!(recman.is_poisoned());

    assert!(matches!(recman.insert_bytes(b"x"), Err(StoreError::Poisoned)));
    assert!(matches!(recman.fetch_bytes(1), Err(StoreError::Poisoned)));
    assert!(matches!(recman.commit(), Err(StoreError::Poisoned)));

    // Rollback is accepted but does not lift the poison
    recman.rollback().unwrap();
    assert!(recman.is_poisoned());
    recman.close().unwrap();
}

/// Point slot 0 of the first data page far past the end of the page
fn corrupt_first_slot_offset(path: &Path, page_size: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    let page_no = (1..bytes.len() / page_size)
        .find(|&page_no| bytes[page_no * page_size] == 2)
        .expect("no data page in file");
    let slot0 = (page_no + 1) * page_size - 4;
    bytes[slot0..slot0 + 2].copy_from_slice(&0xFFF0u16.to_be_bytes());
    std::fs::write(path, &bytes).unwrap();
}

#[test]
fn test_damaged_slot_directory_fails_open_cleanly() {
    let (_temp, path) = setup_temp_store();
    {
        let mut recman = open(&path);
        recman.insert_bytes(b"victim").unwrap();
        recman.insert_bytes(b"bystander").unwrap();
        recman.close().unwrap();
    }
    corrupt_first_slot_offset(&path, 1024);

    match RecordManager::open(&path, &small_pages()) {
        Err(StoreError::Corruption(_)) => {}
        Err(other) => panic!("expected corruption, got {:?}", other),
        Ok(_) => panic!("damaged page was accepted"),
    }
}
