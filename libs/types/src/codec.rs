//! Batch codec — structured encoding plus compression
//!
//! A batch travels and rests in exactly one form: `zstd(bincode(batch))`.
//! The encode/compress stages are exposed separately so callers can reason
//! about failures, but the store and the wire only ever use
//! [`encode_batch`] / [`decode_batch`].

use crate::errors::CodecError;
use crate::tick::{Batch, TickRecord};

/// zstd level used when no explicit level is configured.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Encode records into their structured binary form.
pub fn encode(records: &[TickRecord]) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(records).map_err(|e| CodecError::Encoding(e.to_string()))
}

/// Decode a structured binary buffer back into a batch.
///
/// Fails on truncated buffers and on layouts that do not match the record
/// schema.
pub fn decode(bytes: &[u8]) -> Result<Batch, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decoding(e.to_string()))
}

/// Compress an encoded buffer at the default level.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    compress_with_level(bytes, DEFAULT_COMPRESSION_LEVEL)
}

/// Compress an encoded buffer at an explicit zstd level.
pub fn compress_with_level(bytes: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    zstd::encode_all(bytes, level).map_err(|e| CodecError::Encoding(e.to_string()))
}

/// Decompress a buffer produced by [`compress`].
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::decode_all(bytes).map_err(|e| CodecError::Decoding(e.to_string()))
}

/// Encode and compress a batch: the on-disk and on-wire form.
pub fn encode_batch(records: &[TickRecord]) -> Result<Vec<u8>, CodecError> {
    encode_batch_with_level(records, DEFAULT_COMPRESSION_LEVEL)
}

/// Encode and compress a batch at an explicit zstd level.
pub fn encode_batch_with_level(records: &[TickRecord], level: i32) -> Result<Vec<u8>, CodecError> {
    let encoded = encode(records)?;
    compress_with_level(&encoded, level)
}

/// Decompress and decode a buffer produced by [`encode_batch`].
pub fn decode_batch(bytes: &[u8]) -> Result<Batch, CodecError> {
    let encoded = decompress(bytes)?;
    decode(&encoded)
}
