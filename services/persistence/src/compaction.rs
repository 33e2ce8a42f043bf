//! Compaction — merge per-second batch files into per-minute files
//!
//! Live recording leaves many small files, one per flush. Compaction walks
//! one day, groups its files by minute directory, and replaces every group
//! of two or more files with a single merged batch:
//!
//! 1. decode all members concurrently (loader pool)
//! 2. concatenate records in `(second, suffix)` order
//! 3. stage the merged batch in a durable temp file
//! 4. delete the members that were merged
//! 5. link the staged batch to the first free name of its second
//!
//! Members that fail to decode are left in place and reported; the rest of
//! the group is merged anyway. A group with fewer than two decodable
//! members is left untouched. Compaction of a given day must not run
//! concurrently with itself.
//!
//! A crash between steps 4 and 5 leaves the merged records in the hidden
//! temp file of the minute directory.

use crate::error::{PartialMerge, StoreError};
use crate::loader;
use crate::store::TickStore;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Summary of one compaction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Minute groups examined.
    pub groups_scanned: usize,
    /// Groups replaced by a merged file.
    pub groups_merged: usize,
    pub files_removed: usize,
    pub files_written: usize,
    pub records_merged: usize,
    /// Groups where some members could not be decoded.
    pub partial: Vec<PartialMerge>,
}

impl CompactionReport {
    fn absorb(&mut self, other: CompactionReport) {
        self.groups_scanned += other.groups_scanned;
        self.groups_merged += other.groups_merged;
        self.files_removed += other.files_removed;
        self.files_written += other.files_written;
        self.records_merged += other.records_merged;
        self.partial.extend(other.partial);
    }
}

impl TickStore {
    /// Compact every minute group of one UTC day.
    pub fn compact_date(&self, date: NaiveDate) -> Result<CompactionReport, StoreError> {
        let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for (_, path) in self.scan_date(date)? {
            if let Some(dir) = path.parent() {
                groups.entry(dir.to_path_buf()).or_default().push(path);
            }
        }

        let mut report = CompactionReport::default();
        for (dir, files) in &groups {
            report.groups_scanned += 1;
            if files.len() > 1 {
                self.merge_group(dir, files, &mut report)?;
            }
        }

        info!(
            %date,
            groups = report.groups_scanned,
            merged = report.groups_merged,
            removed = report.files_removed,
            partial = report.partial.len(),
            "Compaction finished"
        );
        Ok(report)
    }

    /// Compact every day present in the store.
    pub fn compact_all(&self) -> Result<CompactionReport, StoreError> {
        let mut report = CompactionReport::default();
        for date in self.dates()? {
            report.absorb(self.compact_date(date)?);
        }
        Ok(report)
    }

    fn merge_group(
        &self,
        dir: &Path,
        files: &[PathBuf],
        report: &mut CompactionReport,
    ) -> Result<(), StoreError> {
        let outcome = loader::load_files(files, self.config().load_workers);

        if !outcome.failures.is_empty() {
            let partial = PartialMerge {
                group: dir.to_path_buf(),
                failed: outcome.failures.iter().map(|(p, _)| p.clone()).collect(),
            };
            for (path, error) in &outcome.failures {
                warn!(path = %path.display(), error = %error, "Leaving undecodable file out of merge");
            }
            warn!(%partial, "Partial merge");
            report.partial.push(partial);
        }

        // A lone readable member stays as it is.
        if outcome.batches.len() < 2 {
            return Ok(());
        }

        let sources: Vec<PathBuf> = outcome.batches.iter().map(|(p, _)| p.clone()).collect();
        let merged = outcome.into_records();
        let staged = self.stage(&merged)?;

        // Sources go first so the merged file takes the lowest free suffix
        // and later live writes still sort after it.
        let mut removed = 0;
        let mut remove_error = None;
        for source in &sources {
            match fs::remove_file(source) {
                Ok(()) => removed += 1,
                Err(e) => {
                    remove_error = Some(e);
                    break;
                }
            }
        }
        let written = match staged {
            Some(staged) => Some(self.commit(staged)?),
            None => None,
        };
        if let Some(e) = remove_error {
            return Err(e.into());
        }

        debug!(
            dir = %dir.display(),
            sources = sources.len(),
            records = merged.len(),
            "Group merged"
        );
        report.groups_merged += 1;
        report.files_removed += removed;
        report.files_written += usize::from(written.is_some());
        report.records_merged += merged.len();
        Ok(())
    }
}
