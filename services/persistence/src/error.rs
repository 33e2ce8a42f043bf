//! Error taxonomy for the tick store

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tick_types::CodecError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Timestamp {0} has no partition path")]
    InvalidTimestamp(i64),

    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },
}

/// A compaction group in which some files could not be decoded.
///
/// The group was still merged from its readable members; the files listed
/// in `failed` were left on disk untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Partial merge in {}: {} file(s) failed to decode", .group.display(), .failed.len())]
pub struct PartialMerge {
    /// Minute directory of the group.
    pub group: PathBuf,
    pub failed: Vec<PathBuf>,
}
