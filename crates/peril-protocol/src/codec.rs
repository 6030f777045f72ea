//! Codec trait and implementations for serializing/deserializing payloads.
//!
//! A codec converts between Rust types and raw bytes and names the
//! content-type tag that travels with those bytes. The messaging core
//! doesn't care HOW payloads are serialized; it picks a [`Codec`] per
//! subscription and swaps implementations freely.
//!
//! Two implementations ship:
//!
//! - [`JsonCodec`]: self-describing text, tolerant of added fields. Used
//!   for moves, war recognitions and pause state.
//! - [`BitcodeCodec`]: compact binary, tied to the exact schema on both
//!   ends. Used for the high-volume game log stream.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Content-type tag for JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content-type tag for bitcode payloads.
pub const CONTENT_TYPE_BINARY: &str = "application/x-bitcode";

/// Returns `true` if the media types of `tag` and `expected` are equal.
///
/// Parameters after `;` are ignored and the comparison is ASCII
/// case-insensitive, so `Application/JSON; charset=utf-8` matches
/// `application/json`.
pub fn media_type_matches(tag: &str, expected: &str) -> bool {
    let media_type = tag.split(';').next().unwrap_or_default().trim();
    media_type.eq_ignore_ascii_case(expected)
}

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds
///
/// - `Send + Sync`: the codec is moved into the spawned task that drives a
///   subscription, and Tokio may poll that task on any worker thread.
/// - `'static`: the codec owns everything it needs and borrows nothing
///   from the caller, so it can outlive the `subscribe` call.
///
/// ## Content-type tags
///
/// Every published message carries the codec's [`content_type`] tag.
/// A subscriber checks the tag with [`accepts`] *before* decoding, so a
/// JSON payload that lands on a binary queue is rejected up front instead
/// of being misread as bitcode. The default [`accepts`] compares media
/// types only, via [`media_type_matches`].
///
/// ## Generic methods
///
/// `encode` and `decode` are generic over the payload type:
/// - `encode<T: Serialize>` → `T` can be turned into bytes
/// - `decode<T: DeserializeOwned>` → `T` can be built from bytes
///
/// `DeserializeOwned` means the decoded value owns its data instead of
/// borrowing from the input, so the delivery's buffer can be dropped as
/// soon as decoding returns.
///
/// [`content_type`]: Codec::content_type
/// [`accepts`]: Codec::accepts
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an encode variant of [`ProtocolError`] if the value can't
    /// be represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a decode variant of [`ProtocolError`] if the bytes are
    /// malformed, incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// The tag published alongside encoded bytes.
    fn content_type(&self) -> &'static str;

    /// Whether a delivery tagged `tag` can be handed to [`decode`](Self::decode).
    fn accepts(&self, tag: &str) -> bool {
        media_type_matches(tag, self.content_type())
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Unknown fields are ignored on decode, so a newer publisher can add
/// fields without breaking older consumers.
///
/// ```rust
/// use peril_protocol::{Codec, JsonCodec, PlayingState};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&PlayingState { is_paused: true }).unwrap();
/// assert_eq!(bytes, br#"{"IsPaused":true}"#);
///
/// let decoded: PlayingState = codec.decode(&bytes).unwrap();
/// assert!(decoded.is_paused);
/// assert!(codec.accepts("application/json; charset=utf-8"));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }
}

// ---------------------------------------------------------------------------
// BitcodeCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses bitcode's serde integration.
///
/// Much smaller than JSON, but the bytes carry no field names: field order
/// and types must match exactly on both ends. A publisher that adds a
/// field breaks every older consumer, which then sees a decode error.
///
/// This is behind the `binary` feature flag (enabled by default).
///
/// ```rust
/// use peril_protocol::{BitcodeCodec, Codec, GameLog};
///
/// let codec = BitcodeCodec;
/// let log = GameLog::now("alice", "bob won a war against alice");
///
/// let bytes = codec.encode(&log).unwrap();
/// let decoded: GameLog = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, log);
///
/// // Half a payload is not a payload.
/// let err = codec.decode::<GameLog>(&bytes[..bytes.len() / 2]).unwrap_err();
/// assert!(err.is_decode());
/// assert!(!codec.accepts("application/json"));
/// ```
#[cfg(feature = "binary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcodeCodec;

#[cfg(feature = "binary")]
impl Codec for BitcodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        bitcode::serialize(value).map_err(ProtocolError::BinaryEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        bitcode::deserialize(data).map_err(ProtocolError::BinaryDecode)
    }

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE_BINARY
    }
}
