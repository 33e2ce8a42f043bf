//! Storage properties exercised through the public API
//!
//! - Insert then load/playback returns the same multiset of records
//! - N inserts into one second produce N distinct paths, suffixes in order
//! - Concurrent writers into one second never overwrite each other
//! - Compaction conserves every record and leaves one file per minute

use chrono::NaiveDate;
use persistence::layout::NANOS_PER_SECOND;
use persistence::{read_batch, StoreConfig, TickStore};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use tick_types::{sort_by_time, DepthEntry, TickRecord, DEPTH_LEVELS};

// 2024-02-16T22:44:16Z
const T: i64 = 1_708_123_456 * NANOS_PER_SECOND;

fn record(symbol: &str, timestamp: i64, price: f32) -> TickRecord {
    let mut bid = [DepthEntry::default(); DEPTH_LEVELS];
    let mut ask = [DepthEntry::default(); DEPTH_LEVELS];
    for (level, (b, a)) in bid.iter_mut().zip(ask.iter_mut()).enumerate() {
        *b = DepthEntry::new(price - 0.05 * (level as f32 + 1.0), 10 * (level as u32 + 1), 1);
        *a = DepthEntry::new(price + 0.05 * (level as f32 + 1.0), 12 * (level as u32 + 1), 2);
    }
    TickRecord::new(symbol, timestamp)
        .with_last_trade(price, 5)
        .with_depth(bid, ask)
}

fn key(r: &TickRecord) -> (String, i64) {
    (r.symbol.clone(), r.timestamp)
}

#[test]
fn insert_then_load_returns_same_multiset() {
    let tmp = TempDir::new().unwrap();
    let store = TickStore::open(StoreConfig::new(tmp.path())).unwrap();

    let mut inserted = Vec::new();
    for batch_no in 0..10i64 {
        let batch: Vec<TickRecord> = (0..7i64)
            .map(|i| {
                record(
                    &format!("SYM{}", i % 3),
                    T + batch_no * 300_000_000 + i * 1_000,
                    100.0 + i as f32,
                )
            })
            .collect();
        store.insert(&batch).unwrap();
        inserted.extend(batch);
    }

    let end = T + 10 * NANOS_PER_SECOND;
    let mut loaded = store.load_range(T, end).unwrap();
    let mut played = Vec::new();
    store.playback(T, end, |r| played.push(r.clone())).unwrap();

    sort_by_time(&mut inserted);
    sort_by_time(&mut loaded);
    sort_by_time(&mut played);
    assert_eq!(loaded, inserted);
    assert_eq!(played, inserted);
}

#[test]
fn same_second_inserts_get_ordered_suffixes() {
    let tmp = TempDir::new().unwrap();
    let store = TickStore::open(StoreConfig::new(tmp.path())).unwrap();

    let paths: Vec<PathBuf> = (0..12)
        .map(|i| {
            store
                .insert(&[record("AAA", T + i * 1_000_000, 10.0)])
                .unwrap()
                .unwrap()
        })
        .collect();

    let names: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let mut expected = vec!["16.tkz".to_string()];
    expected.extend((1..12).map(|n| format!("16_{n}.tkz")));
    assert_eq!(names, expected);

    // Discovery order is write order.
    assert_eq!(store.files_in_range(T, T + NANOS_PER_SECOND).unwrap(), paths);
}

#[test]
fn concurrent_writers_never_overwrite() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(TickStore::open(StoreConfig::new(tmp.path())).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|writer| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..10)
                    .map(|i| {
                        let symbol = format!("W{writer}-{i}");
                        store.insert(&[record(&symbol, T, 1.0)]).unwrap().unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut paths = HashSet::new();
    for handle in handles {
        for path in handle.join().unwrap() {
            assert!(paths.insert(path), "path written twice");
        }
    }
    assert_eq!(paths.len(), 80);

    let loaded = store.load_range(T, T + NANOS_PER_SECOND).unwrap();
    let symbols: HashSet<String> = loaded.into_iter().map(|r| r.symbol).collect();
    assert_eq!(symbols.len(), 80);
}

#[test]
fn compaction_conserves_records() {
    let tmp = TempDir::new().unwrap();
    let store = TickStore::open(StoreConfig::new(tmp.path())).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();

    // Ten files within 22:44, record counts 1..=10.
    let mut originals = Vec::new();
    let mut inserted = Vec::new();
    for k in 1..=10i64 {
        let batch: Vec<TickRecord> = (0..k)
            .map(|i| record(&format!("F{k}"), T + (k % 4) * NANOS_PER_SECOND + i, 50.0))
            .collect();
        originals.push(store.insert(&batch).unwrap().unwrap());
        inserted.extend(batch);
    }

    let report = store.compact_date(date).unwrap();
    assert_eq!(report.groups_merged, 1);
    assert_eq!(report.records_merged, 55);

    let minute_start = T - 16 * NANOS_PER_SECOND;
    let files = store
        .files_in_range(minute_start, minute_start + 60 * NANOS_PER_SECOND)
        .unwrap();
    assert_eq!(files.len(), 1);
    for original in &originals {
        assert!(!original.exists(), "{} survived compaction", original.display());
    }

    let mut merged = read_batch(&files[0]).unwrap();
    assert_eq!(merged.len(), 55);
    sort_by_time(&mut merged);
    sort_by_time(&mut inserted);
    assert_eq!(
        merged.iter().map(key).collect::<Vec<_>>(),
        inserted.iter().map(key).collect::<Vec<_>>()
    );

    // A second pass finds nothing to merge.
    let again = store.compact_date(date).unwrap();
    assert_eq!(again.groups_merged, 0);
    assert_eq!(again.groups_scanned, 1);
}
