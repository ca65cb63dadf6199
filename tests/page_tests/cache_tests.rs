//! Tests for the paged file and page cache
//!
//! These tests verify:
//! - Whole-page reads and writes against the main file
//! - Generic page header accessors
//! - LRU eviction of clean pages
//! - Dirty pages staying resident unless stealing is enabled
//! - Sync, mark_clean and discard_dirty

use std::path::PathBuf;

use pagekv::page::{self, PageCache, PageType, PagedFile, PAGE_HEADER_SIZE};
use pagekv::StoreError;
use tempfile::TempDir;

const PAGE: usize = 1024;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_file() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pages.db");
    (temp_dir, path)
}

/// Page image filled with one byte value
fn filled(byte: u8) -> Vec<u8> {
    vec![byte; PAGE]
}

/// File with `count` pages, page i filled with byte i
fn file_with_pages(path: &PathBuf, count: u64) -> PagedFile {
    let mut file = PagedFile::open(path, PAGE, false).unwrap();
    for page_no in 0..count {
        file.write_page(page_no, &filled(page_no as u8)).unwrap();
    }
    file.sync().unwrap();
    file
}

// =============================================================================
// PagedFile Tests
// =============================================================================

#[test]
fn test_write_then_read_page() {
    let (_temp, path) = setup_temp_file();
    let mut file = file_with_pages(&path, 3);

    assert_eq!(file.page_count().unwrap(), 3);

    let mut buf = vec![0u8; PAGE];
    file.read_page(2, &mut buf).unwrap();
    assert_eq!(buf, filled(2));
}

#[test]
fn test_write_past_end_extends_file() {
    let (_temp, path) = setup_temp_file();
    let mut file = PagedFile::open(&path, PAGE, false).unwrap();

    file.write_page(4, &filled(9)).unwrap();
    assert_eq!(file.page_count().unwrap(), 5);
}

#[test]
fn test_short_read_is_corruption() {
    let (_temp, path) = setup_temp_file();
    let mut file = file_with_pages(&path, 1);

    let mut buf = vec![0u8; PAGE];
    let err = file.read_page(3, &mut buf).unwrap_err();
    assert!(matches!(err, StoreError::Corruption(_)), "got {:?}", err);
}

#[test]
fn test_readonly_file_rejects_writes() {
    let (_temp, path) = setup_temp_file();
    drop(file_with_pages(&path, 1));

    let mut file = PagedFile::open(&path, PAGE, true).unwrap();
    let err = file.write_page(0, &filled(1)).unwrap_err();
    assert!(matches!(err, StoreError::Precondition(_)));
}

#[test]
fn test_readonly_open_of_missing_file_fails() {
    let (_temp, path) = setup_temp_file();
    assert!(PagedFile::open(&path, PAGE, true).is_err());
}

// =============================================================================
// Page Header Tests
// =============================================================================

#[test]
fn test_init_page_stamps_header() {
    let mut buf = filled(0xAB);
    page::init_page(&mut buf, PageType::Translation);

    assert_eq!(page::page_type(&buf).unwrap(), PageType::Translation);
    assert_eq!(page::first_free(&buf) as usize, PAGE_HEADER_SIZE);
    assert_eq!(page::prev(&buf), 0);
    assert_eq!(page::next(&buf), 0);
    assert!(buf[PAGE_HEADER_SIZE..].iter().all(|&b| b == 0));
}

#[test]
fn test_header_links_are_big_endian() {
    let mut buf = vec![0u8; PAGE];
    page::init_page(&mut buf, PageType::FreePhysical);
    page::set_prev(&mut buf, 7);
    page::set_next(&mut buf, 0x0102);

    assert_eq!(page::prev(&buf), 7);
    assert_eq!(page::next(&buf), 0x0102);
    // next occupies bytes 12..20
    assert_eq!(&buf[12..20], &[0, 0, 0, 0, 0, 0, 1, 2]);
}

#[test]
fn test_unknown_or_unexpected_type_is_corruption() {
    let mut buf = vec![0u8; PAGE];
    buf[0] = 42;
    assert!(matches!(
        page::page_type(&buf),
        Err(StoreError::Corruption(_))
    ));

    page::init_page(&mut buf, PageType::Overflow);
    assert!(page::expect_type(&buf, 3, PageType::Overflow).is_ok());
    assert!(matches!(
        page::expect_type(&buf, 3, PageType::UsedPhysical),
        Err(StoreError::Corruption(_))
    ));
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_clean_pages_evicted_least_recently_used_first() {
    let (_temp, path) = setup_temp_file();
    let file = file_with_pages(&path, 4);
    let mut cache = PageCache::new(file, 2, false);

    cache.fetch(1).unwrap();
    cache.fetch(2).unwrap();
    // touch 1 so that 2 becomes the eviction victim
    cache.fetch(1).unwrap();
    cache.fetch(3).unwrap();
    assert_eq!(cache.len(), 2);

    // Change pages 1 and 2 on disk behind the cache's back
    cache.file_mut().write_page(1, &filled(0x11)).unwrap();
    cache.file_mut().write_page(2, &filled(0x22)).unwrap();

    // Page 1 is still resident, page 2 is re-read
    assert_eq!(cache.fetch(1).unwrap()[0], 1);
    assert_eq!(cache.fetch(2).unwrap()[0], 0x22);
}

#[test]
fn test_dirty_pages_never_evicted_without_steal() {
    let (_temp, path) = setup_temp_file();
    let file = PagedFile::open(&path, PAGE, false).unwrap();
    let mut cache = PageCache::new(file, 2, false);

    for page_no in 0..4 {
        cache.create(page_no).unwrap().fill(page_no as u8 + 1);
    }

    // The cache grows past its bound instead of writing uncommitted pages
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.dirty_count(), 4);
    assert_eq!(cache.file().page_count().unwrap(), 0);
}

#[test]
fn test_steal_writes_back_dirty_victim() {
    let (_temp, path) = setup_temp_file();
    let file = PagedFile::open(&path, PAGE, false).unwrap();
    let mut cache = PageCache::new(file, 2, true);

    cache.create(0).unwrap().fill(0xA0);
    cache.create(1).unwrap().fill(0xA1);
    cache.create(2).unwrap().fill(0xA2);

    assert_eq!(cache.len(), 2);
    let mut buf = vec![0u8; PAGE];
    cache.file_mut().read_page(0, &mut buf).unwrap();
    assert_eq!(buf, filled(0xA0));

    // The stolen page reads back through the cache too
    assert_eq!(cache.fetch(0).unwrap()[10], 0xA0);
}

// =============================================================================
// Dirty Tracking Tests
// =============================================================================

#[test]
fn test_dirty_pages_sorted_by_page_number() {
    let (_temp, path) = setup_temp_file();
    let file = file_with_pages(&path, 6);
    let mut cache = PageCache::new(file, 16, false);

    cache.fetch_mut(5).unwrap()[0] = 50;
    cache.fetch(3).unwrap();
    cache.fetch_mut(1).unwrap()[0] = 10;
    cache.fetch_mut(4).unwrap()[0] = 40;

    let pages: Vec<u64> = cache.dirty_pages().iter().map(|(no, _)| *no).collect();
    assert_eq!(pages, vec![1, 4, 5]);
    assert_eq!(cache.dirty_count(), 3);
}

#[test]
fn test_sync_then_mark_clean() {
    let (_temp, path) = setup_temp_file();
    let file = file_with_pages(&path, 3);
    let mut cache = PageCache::new(file, 16, false);

    cache.fetch_mut(2).unwrap().fill(0xEE);
    assert_eq!(cache.sync().unwrap(), 1);
    // Still dirty until the caller confirms the commit
    assert_eq!(cache.dirty_count(), 1);

    cache.mark_clean();
    assert_eq!(cache.dirty_count(), 0);

    let mut buf = vec![0u8; PAGE];
    cache.file_mut().read_page(2, &mut buf).unwrap();
    assert_eq!(buf, filled(0xEE));
}

#[test]
fn test_discard_dirty_restores_disk_image() {
    let (_temp, path) = setup_temp_file();
    let file = file_with_pages(&path, 3);
    let mut cache = PageCache::new(file, 16, false);

    cache.fetch(0).unwrap();
    cache.fetch_mut(1).unwrap().fill(0xFF);
    cache.create(3).unwrap().fill(0xFF);

    assert_eq!(cache.discard_dirty(), 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.fetch(1).unwrap(), &filled(1)[..]);
}

#[test]
fn test_dirty_requires_resident_page() {
    let (_temp, path) = setup_temp_file();
    let file = file_with_pages(&path, 2);
    let mut cache = PageCache::new(file, 16, false);

    assert!(matches!(cache.dirty(1), Err(StoreError::Precondition(_))));
    cache.fetch(1).unwrap();
    cache.dirty(1).unwrap();
    assert_eq!(cache.dirty_count(), 1);
}

#[test]
fn test_released_page_marked_dirty_stays_resident() {
    let (_temp, path) = setup_temp_file();
    let file = file_with_pages(&path, 5);
    let mut cache = PageCache::new(file, 2, false);

    // fetch, drop the borrow, then mark the page dirty
    let first = cache.fetch(0).unwrap()[0];
    assert_eq!(first, 0);
    cache.dirty(0).unwrap();

    for page_no in 1..5 {
        cache.fetch(page_no).unwrap();
    }
    cache.file_mut().write_page(0, &filled(0x99)).unwrap();

    // the dirty page was never evicted, so the disk change stays hidden
    assert_eq!(cache.fetch(0).unwrap()[0], 0);
    assert_eq!(cache.dirty_pages()[0].0, 0);
}
