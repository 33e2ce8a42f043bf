//! Tick record model and batch codec
//!
//! Shared by the persistence layer and the recorder so that files on disk
//! and buffers on the wire use the same batch form.
//!
//! # Modules
//! - `tick`: `TickRecord`, `DepthEntry`, `Batch`
//! - `codec`: encode/decode and compress/decompress of batches
//! - `errors`: codec error taxonomy

pub mod codec;
pub mod errors;
pub mod tick;

pub use codec::{decode_batch, encode_batch};
pub use errors::CodecError;
pub use tick::{sort_by_time, Batch, DepthEntry, TickRecord, DEPTH_LEVELS};
