//! Binary encoding for durably stored mutation payloads.
//!
//! Queue items persist their [`MutationPayload`] as postcard bytes. The batch
//! wire format itself is JSON (see [`crate::batch`]); this module only covers
//! the local at-rest representation.

use crate::mutation::MutationPayload;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`MutationPayload`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the payload cannot be serialized.
pub fn encode_payload(payload: &MutationPayload) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(payload).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`MutationPayload`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_payload(bytes: &[u8]) -> Result<MutationPayload, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
