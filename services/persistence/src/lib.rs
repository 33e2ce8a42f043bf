//! Tick Persistence Service
//!
//! Write-once, time-partitioned storage for tick batches, with concurrent
//! bulk loading, bounded-memory playback, and per-minute compaction.
//!
//! # Layout
//! ```text
//! <root>/YYYY/MM/DD/hh/mm/ss[_N].tkz   one file = zstd(bincode(batch))
//! ```
//!
//! # Modules
//! - `layout`: timestamp ⇄ partition path mapping
//! - `store`: insert / load / playback / dates
//! - `loader`: fixed worker pool for concurrent decoding
//! - `compaction`: per-minute merge of small files

pub mod compaction;
pub mod error;
pub mod layout;
pub mod loader;
pub mod store;

pub use compaction::CompactionReport;
pub use error::{PartialMerge, StoreError};
pub use layout::{PartitionKey, BATCH_EXTENSION};
pub use store::{read_batch, PlaybackStats, StoreConfig, TickStore};
