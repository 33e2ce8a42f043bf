//! Partition layout — timestamp to file path mapping
//!
//! Every batch file lives at
//!
//! ```text
//! <root>/<YYYY>/<MM>/<DD>/<hh>/<mm>/<ss>[_<N>].tkz
//! ```
//!
//! where the date-time is the UTC second of the batch's first record and
//! `<N>` is the smallest positive integer that makes the path unique (the
//! zeroth file in a second carries no suffix). This layout is the storage
//! contract; changing it requires a migration.

use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Extension marking a compressed, encoded batch.
pub const BATCH_EXTENSION: &str = "tkz";

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

// ── Partition Key ───────────────────────────────────────────────────

/// Identity of one batch file: the second it belongs to plus its
/// collision suffix.
///
/// Ordering is `(second, suffix)`, which is also write order within a
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    /// Unix seconds (UTC) of the partition.
    pub second: i64,
    /// Collision suffix; 0 means "no suffix".
    pub suffix: u32,
}

impl PartitionKey {
    /// Base key (suffix 0) for a nanosecond timestamp.
    pub fn for_timestamp(timestamp_nanos: i64) -> Self {
        Self {
            second: timestamp_nanos.div_euclid(NANOS_PER_SECOND),
            suffix: 0,
        }
    }

    pub fn with_suffix(self, suffix: u32) -> Self {
        Self { suffix, ..self }
    }

    /// File name inside the minute directory, e.g. `07.tkz` or `07_2.tkz`.
    pub fn file_name(&self) -> Option<String> {
        let second = Utc.timestamp_opt(self.second, 0).single()?.second();
        Some(match self.suffix {
            0 => format!("{:02}.{}", second, BATCH_EXTENSION),
            n => format!("{:02}_{}.{}", second, n, BATCH_EXTENSION),
        })
    }

    /// Path of this key relative to the store root.
    ///
    /// Returns `None` when the second cannot be represented as a calendar
    /// date.
    pub fn relative_path(&self) -> Option<PathBuf> {
        Some(minute_dir(Path::new(""), self.second)?.join(self.file_name()?))
    }

    /// Absolute path of this key under `root`.
    pub fn path(&self, root: &Path) -> Option<PathBuf> {
        Some(root.join(self.relative_path()?))
    }

    /// Parse a batch file path back into its key.
    ///
    /// Only canonical paths are accepted: zero-padded components, the batch
    /// extension, and no `_0` suffix. Anything else (temp files, foreign
    /// files) yields `None`.
    pub fn parse(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        let [year, month, day, hour, minute, file] = parts.as_slice() else {
            return None;
        };

        let (second, suffix) = parse_file_name(file)?;
        let dir_parts = [
            parse_component(year, 4)?,
            parse_component(month, 2)?,
            parse_component(day, 2)?,
            parse_component(hour, 2)?,
            parse_component(minute, 2)?,
        ];
        let (minute_start, _) = dir_span(&dir_parts)?;
        if second >= 60 {
            return None;
        }

        Some(Self {
            second: minute_start + i64::from(second),
            suffix,
        })
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.second
            .cmp(&other.second)
            .then(self.suffix.cmp(&other.suffix))
    }
}

/// Minute directory (`<root>/YYYY/MM/DD/hh/mm`) holding a given second.
pub fn minute_dir(root: &Path, second: i64) -> Option<PathBuf> {
    let dt = Utc.timestamp_opt(second, 0).single()?;
    Some(
        root.join(format!("{:04}", dt.year()))
            .join(format!("{:02}", dt.month()))
            .join(format!("{:02}", dt.day()))
            .join(format!("{:02}", dt.hour()))
            .join(format!("{:02}", dt.minute())),
    )
}

/// Day directory (`<root>/YYYY/MM/DD`) for a date.
pub fn day_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
}

/// Half-open nanosecond range covering a whole UTC day.
pub fn day_range(date: NaiveDate) -> Option<(i64, i64)> {
    let start = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?).timestamp();
    let end = start.checked_add(SECONDS_PER_DAY)?;
    Some((
        start.checked_mul(NANOS_PER_SECOND)?,
        end.checked_mul(NANOS_PER_SECOND)?,
    ))
}

// ── Range Selection ─────────────────────────────────────────────────

/// Partition seconds selected by a half-open nanosecond range.
///
/// A second is selected when it lies in `[floor_sec(start), end)`, so a
/// record at `T` is found by a range starting anywhere inside `T`'s second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondRange {
    first: i64,
    end_nanos: i64,
}

impl SecondRange {
    /// `start == end` is an empty range and selects nothing.
    pub fn new(start_nanos: i64, end_nanos: i64) -> Self {
        if start_nanos == end_nanos {
            return Self::empty();
        }
        Self {
            first: start_nanos.div_euclid(NANOS_PER_SECOND),
            end_nanos,
        }
    }

    fn empty() -> Self {
        Self {
            first: i64::MAX,
            end_nanos: i64::MIN,
        }
    }

    /// Range selecting every partition.
    pub fn all() -> Self {
        Self {
            first: i64::MIN,
            end_nanos: i64::MAX,
        }
    }

    pub fn contains(&self, second: i64) -> bool {
        second >= self.first && starts_before(second, self.end_nanos)
    }

    /// Whether any second of `[span_start, span_end)` is selected.
    pub fn overlaps(&self, span_start: i64, span_end: i64) -> bool {
        span_end > self.first && starts_before(span_start, self.end_nanos)
    }
}

fn starts_before(second: i64, end_nanos: i64) -> bool {
    i128::from(second) * i128::from(NANOS_PER_SECOND) < i128::from(end_nanos)
}

// ── Directory Parsing ───────────────────────────────────────────────

/// Parse a zero-padded numeric directory name of exactly `width` digits.
pub(crate) fn parse_component(name: &str, width: usize) -> Option<u32> {
    if name.len() != width || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Parse `ss.tkz` / `ss_N.tkz` into `(second-of-minute, suffix)`.
fn parse_file_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(BATCH_EXTENSION)?.strip_suffix('.')?;
    let (second, suffix) = match stem.split_once('_') {
        None => (stem, 0),
        Some((second, suffix)) => {
            if suffix.starts_with('0') || suffix.is_empty() {
                return None;
            }
            if !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (second, suffix.parse().ok()?)
        }
    };
    Some((parse_component(second, 2)?, suffix))
}

/// Span in Unix seconds covered by a directory prefix
/// `[year, month, day, hour, minute]` (1 to 5 components).
pub(crate) fn dir_span(parts: &[u32]) -> Option<(i64, i64)> {
    let at = |y: i32, m: u32, d: u32| -> Option<i64> {
        let naive = NaiveDate::from_ymd_opt(y, m, d)?.and_hms_opt(0, 0, 0)?;
        Some(Utc.from_utc_datetime(&naive).timestamp())
    };
    let next_month = |y: i32, m: u32| if m == 12 { (y + 1, 1) } else { (y, m + 1) };

    match *parts {
        [year] => {
            let year = i32::try_from(year).ok()?;
            Some((at(year, 1, 1)?, at(year + 1, 1, 1)?))
        }
        [year, month] => {
            let year = i32::try_from(year).ok()?;
            let (ny, nm) = next_month(year, month);
            Some((at(year, month, 1)?, at(ny, nm, 1)?))
        }
        [year, month, day] => {
            let start = at(i32::try_from(year).ok()?, month, day)?;
            Some((start, start + SECONDS_PER_DAY))
        }
        [year, month, day, hour] => {
            if hour >= 24 {
                return None;
            }
            let start = at(i32::try_from(year).ok()?, month, day)? + i64::from(hour) * 3600;
            Some((start, start + 3600))
        }
        [year, month, day, hour, minute] => {
            if hour >= 24 || minute >= 60 {
                return None;
            }
            let start = at(i32::try_from(year).ok()?, month, day)?
                + i64::from(hour) * 3600
                + i64::from(minute) * 60;
            Some((start, start + 60))
        }
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────
