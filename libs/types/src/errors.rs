//! Error types for the batch codec

use thiserror::Error;

/// Failures while turning batches into bytes and back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A batch could not be encoded or compressed.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A buffer was truncated, not validly compressed, or did not match the
    /// record schema.
    #[error("Decoding error: {0}")]
    Decoding(String),
}
