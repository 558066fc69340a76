//! Integration tests for the buffer pool manager.
//!
//! These tests verify cross-component behavior that unit tests don't cover.

use pagepool::{BufferPoolManager, DiskManager, Error, PageId, PAGE_SIZE};
use std::fs::OpenOptions;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn create_bpm(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let dm = DiskManager::create(&path).unwrap().with_sync_on_write(false);
    (BufferPoolManager::new(pool_size, dm).unwrap(), dir)
}

/// Deterministic per-page fill pattern.
fn pattern(page: u32, offset: usize) -> u8 {
    (page as usize * 31 + offset * 7) as u8
}

/// Test data persistence across multiple eviction cycles.
#[test]
fn test_data_persistence_across_evictions() {
    let (bpm, _dir) = create_bpm(2);

    // Create 5 pages with unique data (forces evictions)
    let mut page_ids = vec![];
    for i in 0u8..5 {
        let mut guard = bpm.new_page().unwrap();
        let data = guard.data_mut().unwrap();
        data[0] = i;
        data[1] = i.wrapping_mul(3);
        page_ids.push(guard.page_id());
    }

    // Read all back - verifies evicted pages were written back
    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data().unwrap()[0], i as u8);
        assert_eq!(guard.data().unwrap()[1], (i as u8).wrapping_mul(3));
    }
}

/// Full-page contents survive write, flush, eviction and reload.
#[test]
fn test_round_trip_through_eviction() {
    let (bpm, _dir) = create_bpm(1);

    let pid = {
        let mut guard = bpm.new_page().unwrap();
        let pid = guard.page_id();
        for (offset, byte) in guard.data_mut().unwrap().iter_mut().enumerate() {
            *byte = pattern(pid.0, offset);
        }
        pid
    };
    bpm.flush_page(pid).unwrap();

    // Only one frame: this evicts `pid`.
    let other = bpm.new_page().unwrap().page_id();
    assert!(!bpm.contains_page(pid));
    assert!(bpm.contains_page(other));

    let guard = bpm.fetch_page_read(pid).unwrap();
    let data = guard.data().unwrap();
    assert_eq!(data.len(), PAGE_SIZE);
    assert!(data
        .iter()
        .enumerate()
        .all(|(offset, &byte)| byte == pattern(pid.0, offset)));
}

/// Test flush and reload across BPM instances.
#[test]
fn test_flush_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let data = b"persistent!";

    let pid;

    // First session: create and write
    {
        let dm = DiskManager::create(&path).unwrap();
        let bpm = BufferPoolManager::new(10, dm).unwrap();

        let mut guard = bpm.new_page().unwrap();
        pid = guard.page_id();
        guard.data_mut().unwrap()[..data.len()].copy_from_slice(data);
        drop(guard);

        bpm.flush_all_pages().unwrap();
    }

    // Second session: verify data
    {
        let dm = DiskManager::open(&path).unwrap();
        let bpm = BufferPoolManager::new(10, dm).unwrap();

        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(&guard.data().unwrap()[..data.len()], data);
    }
}

/// Test concurrent writers to different pages.
#[test]
fn test_concurrent_writers() {
    let (bpm, _dir) = create_bpm(10);
    let bpm = Arc::new(bpm);

    let page_ids: Vec<PageId> = (0..5)
        .map(|_| bpm.new_page().unwrap().page_id())
        .collect();

    let handles: Vec<_> = page_ids
        .iter()
        .enumerate()
        .map(|(i, &pid)| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                for j in 0..50 {
                    let mut guard = bpm.fetch_page_write(pid).unwrap();
                    guard.data_mut().unwrap()[0] = ((i * 50 + j) % 256) as u8;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // Verify each page has last written value
    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = bpm.fetch_page_read(pid).unwrap();
        assert_eq!(guard.data().unwrap()[0], ((i * 50 + 49) % 256) as u8);
    }
}

/// Threads churn through more pages than frames; every page keeps its data.
#[test]
fn test_concurrent_churn_under_eviction() {
    const THREADS: u32 = 4;
    const PAGES_PER_THREAD: u32 = 16;

    let (bpm, _dir) = create_bpm(8);
    let bpm = Arc::new(bpm);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bpm = Arc::clone(&bpm);
            thread::spawn(move || {
                let mut mine = Vec::new();
                for _ in 0..PAGES_PER_THREAD {
                    let mut guard = bpm.new_page().unwrap();
                    let pid = guard.page_id();
                    let data = guard.data_mut().unwrap();
                    data[0] = pattern(pid.0, 0);
                    data[PAGE_SIZE - 1] = pattern(pid.0, PAGE_SIZE - 1);
                    mine.push(pid);
                }
                for &pid in &mine {
                    let guard = bpm.fetch_page_read(pid).unwrap();
                    let data = guard.data().unwrap();
                    assert_eq!(data[0], pattern(pid.0, 0));
                    assert_eq!(data[PAGE_SIZE - 1], pattern(pid.0, PAGE_SIZE - 1));
                }
                mine
            })
        })
        .collect();

    let mut all: Vec<PageId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), (THREADS * PAGES_PER_THREAD) as usize);

    assert_eq!(bpm.page_count(), 8);
    assert_eq!(bpm.evictable_count(), 8);
}

/// Test stats accuracy.
#[test]
fn test_stats_accuracy() {
    let (bpm, _dir) = create_bpm(2);

    let pid = bpm.new_page().unwrap().page_id();

    for _ in 0..5 {
        drop(bpm.fetch_page_read(pid).unwrap());
    }

    let stats = bpm.stats().snapshot();
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.misses, 0);

    // Third page forces a dirty eviction.
    bpm.new_page().unwrap();
    bpm.new_page().unwrap();

    let stats = bpm.stats().snapshot();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.dirty_writebacks, 1);
    assert_eq!(stats.pages_written, 1);

    bpm.stats().reset();
    assert_eq!(bpm.stats().hit_rate(), 0.0);
}

/// A torn trailing page reports a short read and leaves the pool usable.
#[test]
fn test_short_read_releases_frame() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    {
        let bpm = BufferPoolManager::new(4, DiskManager::create(&path).unwrap()).unwrap();
        bpm.new_page().unwrap();
        bpm.new_page().unwrap();
        bpm.flush_all_pages().unwrap();
    }

    // Cut page 1 short.
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(PAGE_SIZE as u64 + 100)
        .unwrap();

    let bpm = BufferPoolManager::new(4, DiskManager::open(&path).unwrap()).unwrap();
    let torn = PageId::new(1);

    match bpm.fetch_page_read(torn) {
        Err(Error::ShortRead {
            page_id,
            expected,
            actual,
        }) => {
            assert_eq!(page_id, torn);
            assert_eq!(expected, PAGE_SIZE);
            assert_eq!(actual, 100);
        }
        Err(other) => panic!("expected a short read, got {other}"),
        Ok(_) => panic!("expected a short read, got a page"),
    }

    assert!(!bpm.contains_page(torn));
    assert_eq!(bpm.free_frame_count(), 4);

    // The intact page is still readable and the pool still hands out pages.
    assert!(bpm.fetch_page_read(PageId::new(0)).is_ok());
    assert_eq!(bpm.new_page().unwrap().page_id(), PageId::new(2));
}
