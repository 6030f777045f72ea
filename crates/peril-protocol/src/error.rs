//! Error types for the protocol layer.
//!
//! When you see a `ProtocolError`, the problem is in turning payloads
//! into bytes or back, never in the broker or in routing.

/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed: malformed text, missing required
    /// fields, or wrong data types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// Binary serialization failed.
    #[cfg(feature = "binary")]
    #[error("binary encode failed: {0}")]
    BinaryEncode(bitcode::Error),

    /// Binary deserialization failed. Bitcode payloads carry no schema,
    /// so truncated input and schema drift both end up here.
    #[cfg(feature = "binary")]
    #[error("binary decode failed: {0}")]
    BinaryDecode(bitcode::Error),
}

impl ProtocolError {
    /// Whether this error came from the decoding direction.
    ///
    /// Decode failures on a delivery mark it as poison; encode failures
    /// happen on the publishing side before anything reaches the broker.
    pub fn is_decode(&self) -> bool {
        match self {
            #[cfg(feature = "json")]
            Self::Decode(_) => true,
            #[cfg(feature = "binary")]
            Self::BinaryDecode(_) => true,
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}
