//! Tick Store — write-once, time-partitioned batch files
//!
//! Each `insert` produces exactly one new file holding one compressed batch.
//! Files are never rewritten; the only deletions come from compaction after
//! the merged replacement is durable.
//!
//! Write protocol per batch:
//! 1. encode + compress the batch
//! 2. write it to a hidden temp file in the target minute directory, fsync
//! 3. hard-link the temp file to the first free `ss[_N].tkz` name
//! 4. remove the temp file
//!
//! Linking fails when the name already exists, so concurrent writers into
//! the same second never overwrite each other and readers never observe a
//! partially written batch file.

use crate::error::StoreError;
use crate::layout::{self, PartitionKey, SecondRange};
use crate::loader;
use chrono::{NaiveDate, Utc};
use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use tick_types::codec;
use tick_types::{Batch, TickRecord};
use tracing::{debug, info, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a tick store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the partition tree.
    pub root: PathBuf,
    /// zstd level applied to every written batch.
    pub compression_level: i32,
    /// Worker threads used for concurrent bulk loads.
    pub load_workers: usize,
}

impl StoreConfig {
    /// Create a config with defaults: level 3 compression and one loader
    /// worker per available core.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression_level: codec::DEFAULT_COMPRESSION_LEVEL,
            load_workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Counters reported by a playback run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub files_read: u64,
    /// Files that could not be read or decoded.
    pub files_skipped: u64,
    pub records: u64,
}

/// An encoded batch sitting in a hidden temp file, not yet visible to
/// readers.
#[derive(Debug)]
pub(crate) struct StagedBatch {
    temp: PathBuf,
    key: PartitionKey,
    records: usize,
    bytes: usize,
}

// ── Tick Store ──────────────────────────────────────────────────────

/// Partitioned batch file store.
///
/// Stateless beyond the filesystem: reads may run concurrently from any
/// number of threads.
#[derive(Debug)]
pub struct TickStore {
    config: StoreConfig,
}

impl TickStore {
    /// Open a store, creating the root directory if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.root)?;
        info!(
            root = %config.root.display(),
            compression_level = config.compression_level,
            load_workers = config.load_workers,
            "TickStore opened"
        );
        Ok(Self { config })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Persist one batch as a new file.
    ///
    /// The partition comes from the first record's timestamp. Returns
    /// `Ok(None)` for an empty batch and the written path otherwise. Errors
    /// are returned to the caller as-is; nothing is retried here.
    pub fn insert(&self, records: &[TickRecord]) -> Result<Option<PathBuf>, StoreError> {
        match self.stage(records)? {
            Some(staged) => self.commit(staged).map(Some),
            None => Ok(None),
        }
    }

    /// Encode `records` into a durable temp file in their minute directory,
    /// without giving it a batch name yet.
    pub(crate) fn stage(&self, records: &[TickRecord]) -> Result<Option<StagedBatch>, StoreError> {
        let Some(first) = records.first() else {
            return Ok(None);
        };

        let key = PartitionKey::for_timestamp(first.timestamp);
        let dir = layout::minute_dir(&self.config.root, key.second)
            .ok_or(StoreError::InvalidTimestamp(first.timestamp))?;
        fs::create_dir_all(&dir)?;

        let bytes = codec::encode_batch_with_level(records, self.config.compression_level)?;
        let temp = write_temp(&dir, &bytes)?;
        Ok(Some(StagedBatch {
            temp,
            key,
            records: records.len(),
            bytes: bytes.len(),
        }))
    }

    /// Link a staged batch to the first free name of its second.
    pub(crate) fn commit(&self, staged: StagedBatch) -> Result<PathBuf, StoreError> {
        let linked = self.link_unique(&staged.temp, staged.key);
        if let Err(e) = fs::remove_file(&staged.temp) {
            warn!(path = %staged.temp.display(), error = %e, "Failed to remove temp batch file");
        }
        let path = linked?;

        debug!(
            path = %path.display(),
            records = staged.records,
            bytes = staged.bytes,
            "Batch written"
        );
        Ok(path)
    }

    /// Load every record stored in partitions selected by `[start, end)`
    /// (Unix nanoseconds).
    ///
    /// Files are decoded concurrently and returned in discovery order:
    /// partition second, then suffix. Records are not sorted across files.
    /// Unreadable files are skipped with a warning.
    pub fn load_range(&self, start: i64, end: i64) -> Result<Batch, StoreError> {
        self.load_selected(select(start, end)?)
    }

    /// Load a whole UTC day.
    pub fn load_date(&self, date: NaiveDate) -> Result<Batch, StoreError> {
        self.load_selected(day_selection(date)?)
    }

    /// Load everything in the store.
    pub fn load_all(&self) -> Result<Batch, StoreError> {
        self.load_selected(SecondRange::all())
    }

    /// Visit every record in partitions selected by `[start, end)`.
    ///
    /// Files are read one at a time, so memory stays bounded by the largest
    /// single batch regardless of the range size.
    pub fn playback<F>(&self, start: i64, end: i64, mut visitor: F) -> Result<PlaybackStats, StoreError>
    where
        F: FnMut(&TickRecord),
    {
        self.playback_selected(select(start, end)?, &mut visitor)
    }

    pub fn playback_date<F>(&self, date: NaiveDate, mut visitor: F) -> Result<PlaybackStats, StoreError>
    where
        F: FnMut(&TickRecord),
    {
        self.playback_selected(day_selection(date)?, &mut visitor)
    }

    /// Play back the current UTC day.
    pub fn playback_today<F>(&self, visitor: F) -> Result<PlaybackStats, StoreError>
    where
        F: FnMut(&TickRecord),
    {
        self.playback_date(Utc::now().date_naive(), visitor)
    }

    pub fn playback_all<F>(&self, mut visitor: F) -> Result<PlaybackStats, StoreError>
    where
        F: FnMut(&TickRecord),
    {
        self.playback_selected(SecondRange::all(), &mut visitor)
    }

    /// Batch files in partitions selected by `[start, end)`, in discovery
    /// order.
    pub fn files_in_range(&self, start: i64, end: i64) -> Result<Vec<PathBuf>, StoreError> {
        Ok(self
            .scan(select(start, end)?)?
            .into_iter()
            .map(|(_, path)| path)
            .collect())
    }

    /// Distinct UTC days that have a partition directory, ascending.
    pub fn dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let mut dates = Vec::new();
        for (year, year_dir) in numeric_subdirs(&self.config.root, 4)? {
            for (month, month_dir) in numeric_subdirs_or_warn(&year_dir) {
                for (day, _) in numeric_subdirs_or_warn(&month_dir) {
                    let date = i32::try_from(year)
                        .ok()
                        .and_then(|y| NaiveDate::from_ymd_opt(y, month, day));
                    if let Some(date) = date {
                        dates.push(date);
                    }
                }
            }
        }
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    // ── Internal Helpers ────────────────────────────────────────────

    pub(crate) fn scan_date(&self, date: NaiveDate) -> Result<Vec<(PartitionKey, PathBuf)>, StoreError> {
        self.scan(day_selection(date)?)
    }

    fn load_selected(&self, range: SecondRange) -> Result<Batch, StoreError> {
        let paths: Vec<PathBuf> = self.scan(range)?.into_iter().map(|(_, p)| p).collect();
        let outcome = loader::load_files(&paths, self.config.load_workers);
        for (path, error) in &outcome.failures {
            warn!(path = %path.display(), error = %error, "Skipping unreadable batch file");
        }
        debug!(
            files = outcome.batches.len(),
            skipped = outcome.failures.len(),
            "Range loaded"
        );
        Ok(outcome.into_records())
    }

    fn playback_selected(
        &self,
        range: SecondRange,
        visitor: &mut dyn FnMut(&TickRecord),
    ) -> Result<PlaybackStats, StoreError> {
        let mut stats = PlaybackStats::default();
        for (_, path) in self.scan(range)? {
            match read_batch(&path) {
                Ok(batch) => {
                    stats.files_read += 1;
                    stats.records += batch.len() as u64;
                    for record in &batch {
                        visitor(record);
                    }
                }
                Err(e) => {
                    stats.files_skipped += 1;
                    warn!(path = %path.display(), error = %e, "Skipping unreadable batch file");
                }
            }
        }
        Ok(stats)
    }

    fn link_unique(&self, temp: &Path, key: PartitionKey) -> Result<PathBuf, StoreError> {
        let mut suffix = 0u32;
        loop {
            let candidate = key
                .with_suffix(suffix)
                .path(&self.config.root)
                .ok_or(StoreError::InvalidTimestamp(key.second))?;
            match fs::hard_link(temp, &candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Walk the partition tree, descending only into directories whose
    /// time span overlaps `range`. Results are sorted by key.
    fn scan(&self, range: SecondRange) -> Result<Vec<(PartitionKey, PathBuf)>, StoreError> {
        let root = &self.config.root;
        let mut found = Vec::new();
        let mut pending: Vec<(PathBuf, Vec<u32>)> = Vec::new();

        for (year, dir) in numeric_subdirs(root, 4)? {
            pending.push((dir, vec![year]));
        }

        while let Some((dir, prefix)) = pending.pop() {
            match layout::dir_span(&prefix) {
                Some((span_start, span_end)) if range.overlaps(span_start, span_end) => {}
                _ => continue,
            }

            if prefix.len() < 5 {
                for (value, child) in numeric_subdirs_or_warn(&dir) {
                    let mut next = prefix.clone();
                    next.push(value);
                    pending.push((child, next));
                }
                continue;
            }

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable partition directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                if let Some(key) = PartitionKey::parse(root, &path) {
                    if range.contains(key.second) {
                        found.push((key, path));
                    }
                }
            }
        }

        found.sort_by_key(|(key, _)| *key);
        Ok(found)
    }
}

/// Read and decode one batch file.
pub fn read_batch(path: &Path) -> Result<Batch, StoreError> {
    let bytes = fs::read(path)?;
    Ok(codec::decode_batch(&bytes)?)
}

fn select(start: i64, end: i64) -> Result<SecondRange, StoreError> {
    if start > end {
        return Err(StoreError::InvalidRange { start, end });
    }
    Ok(SecondRange::new(start, end))
}

fn day_selection(date: NaiveDate) -> Result<SecondRange, StoreError> {
    let (start, end) = layout::day_range(date).ok_or(StoreError::InvalidRange {
        start: i64::MIN,
        end: i64::MAX,
    })?;
    Ok(SecondRange::new(start, end))
}

fn write_temp(dir: &Path, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    let temp = dir.join(format!(
        ".{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(temp)
}

/// Numeric child directories of `dir` whose names are exactly `width`
/// digits, sorted by value. A missing `dir` yields no children.
fn numeric_subdirs(dir: &Path, width: usize) -> Result<Vec<(u32, PathBuf)>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut children = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let value = entry
            .file_name()
            .to_str()
            .and_then(|name| layout::parse_component(name, width));
        if let Some(value) = value {
            children.push((value, entry.path()));
        }
    }
    children.sort_by_key(|(value, _)| *value);
    Ok(children)
}

/// Two-digit child directories below the year level; read failures are
/// logged and treated as empty so one bad directory does not abort a scan.
fn numeric_subdirs_or_warn(dir: &Path) -> Vec<(u32, PathBuf)> {
    numeric_subdirs(dir, 2).unwrap_or_else(|e| {
        warn!(dir = %dir.display(), error = %e, "Skipping unreadable partition directory");
        Vec::new()
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::NANOS_PER_SECOND;
    use tempfile::TempDir;

    // 2024-02-16T22:44:16Z
    const T: i64 = 1_708_123_456 * NANOS_PER_SECOND;

    fn open_store(dir: &Path) -> TickStore {
        TickStore::open(StoreConfig::new(dir)).unwrap()
    }

    fn tick(symbol: &str, timestamp: i64) -> TickRecord {
        TickRecord::new(symbol, timestamp).with_last_trade(101.5, 10)
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_insert_empty_batch_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        assert_eq!(store.insert(&[]).unwrap(), None);
        assert!(store.dates().unwrap().is_empty());
    }

    #[test]
    fn test_insert_writes_partition_path() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());

        let path = store.insert(&[tick("AAA", T + 250)]).unwrap().unwrap();
        assert_eq!(path, tmp.path().join("2024/02/16/22/44/16.tkz"));
        assert!(path.exists());
    }

    #[test]
    fn test_insert_same_second_uses_suffixes() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());

        let written: Vec<PathBuf> = (0..4)
            .map(|i| store.insert(&[tick("AAA", T + i)]).unwrap().unwrap())
            .collect();
        assert_eq!(names(&written), vec!["16.tkz", "16_1.tkz", "16_2.tkz", "16_3.tkz"]);

        let listed = store.files_in_range(T, T + NANOS_PER_SECOND).unwrap();
        assert_eq!(listed, written);
    }

    #[test]
    fn test_insert_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let path = store.insert(&[tick("AAA", T)]).unwrap().unwrap();

        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_insert_then_load_range_single_record() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());

        let mut record = tick("AAA", T);
        record.bid[0] = tick_types::DepthEntry::new(101.25, 40, 3);
        store.insert(std::slice::from_ref(&record)).unwrap();

        let loaded = store.load_range(T, T + NANOS_PER_SECOND).unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn test_load_range_excludes_outside_partitions() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        store.insert(&[tick("EARLY", T - NANOS_PER_SECOND)]).unwrap();
        store.insert(&[tick("IN", T)]).unwrap();
        store.insert(&[tick("LATE", T + 60 * NANOS_PER_SECOND)]).unwrap();

        let loaded = store.load_range(T, T + NANOS_PER_SECOND).unwrap();
        let symbols: Vec<&str> = loaded.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["IN"]);
    }

    #[test]
    fn test_load_range_rejects_inverted_range() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        assert!(matches!(
            store.load_range(T, T - 1),
            Err(StoreError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_playback_visits_every_record() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        store.insert(&[tick("A", T), tick("B", T + 1)]).unwrap();
        store.insert(&[tick("C", T + 2 * NANOS_PER_SECOND)]).unwrap();

        let mut seen = Vec::new();
        let stats = store
            .playback(T, T + 10 * NANOS_PER_SECOND, |r| seen.push(r.symbol.clone()))
            .unwrap();
        assert_eq!(seen, vec!["A", "B", "C"]);
        assert_eq!(
            stats,
            PlaybackStats {
                files_read: 2,
                files_skipped: 0,
                records: 3
            }
        );
    }

    #[test]
    fn test_corrupt_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        store.insert(&[tick("GOOD", T)]).unwrap();
        let bad = store.insert(&[tick("BAD", T)]).unwrap().unwrap();
        fs::write(&bad, b"not a batch").unwrap();

        let loaded = store.load_range(T, T + NANOS_PER_SECOND).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "GOOD");

        let stats = store.playback(T, T + NANOS_PER_SECOND, |_| {}).unwrap();
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.records, 1);
    }

    #[test]
    fn test_foreign_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let path = store.insert(&[tick("AAA", T)]).unwrap().unwrap();
        let dir = path.parent().unwrap();
        fs::write(dir.join("notes.txt"), b"hello").unwrap();
        fs::write(dir.join(".1.2.tmp"), b"partial").unwrap();

        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_dates_lists_day_directories() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let day = 86_400 * NANOS_PER_SECOND;
        store.insert(&[tick("A", T + day)]).unwrap();
        store.insert(&[tick("B", T)]).unwrap();
        store.insert(&[tick("C", T + 1)]).unwrap();
        fs::create_dir_all(tmp.path().join("scratch")).unwrap();

        let dates = store.dates().unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 16).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 17).unwrap(),
            ]
        );
    }

    #[test]
    fn test_load_date_and_playback_date() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let day = 86_400 * NANOS_PER_SECOND;
        store.insert(&[tick("TODAY", T)]).unwrap();
        store.insert(&[tick("TOMORROW", T + day)]).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();
        let loaded = store.load_date(date).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "TODAY");

        let mut count = 0;
        store.playback_all(|_| count += 1).unwrap();
        assert_eq!(count, 2);

        let mut symbols = Vec::new();
        store
            .playback_date(date.succ_opt().unwrap(), |r| symbols.push(r.symbol.clone()))
            .unwrap();
        assert_eq!(symbols, vec!["TOMORROW"]);
    }

    #[test]
    fn test_empty_range_selects_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        store.insert(&[tick("AAA", T)]).unwrap();

        let mid = T + NANOS_PER_SECOND / 2;
        assert!(store.load_range(mid, mid).unwrap().is_empty());
        assert!(store.files_in_range(T, T).unwrap().is_empty());
        assert_eq!(store.playback(mid, mid, |_| {}).unwrap().records, 0);
    }

    #[test]
    fn test_playback_today() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path());
        let now = Utc::now().timestamp_nanos_opt().unwrap();
        store.insert(&[tick("NOW", now)]).unwrap();
        store.insert(&[tick("OLD", T)]).unwrap();

        let mut symbols = Vec::new();
        let stats = store
            .playback_today(|r| symbols.push(r.symbol.clone()))
            .unwrap();
        assert_eq!(symbols, vec!["NOW"]);
        assert_eq!(stats.files_read, 1);
    }
}
