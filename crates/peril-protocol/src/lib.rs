//! Payload protocol for Peril.
//!
//! This crate defines what travels inside a broker message:
//!
//! - **Types** ([`ArmyMove`], [`RecognitionOfWar`], [`GameLog`], ...):
//!   the game's domain payloads.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`BitcodeCodec`]): how
//!   payloads become bytes and which content-type tag marks them.
//! - **Routing** ([`routing`]): exchange names and routing-key builders.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between the broker (raw bytes) and the
//! messaging core (typed handlers). It never talks to a broker itself.
//!
//! ```text
//! Broker (bytes) → Protocol (typed payloads) → PubSub (ack decisions)
//! ```
//!
//! # Feature Flags
//!
//! - `json` (default): [`JsonCodec`] via `serde_json`
//! - `binary` (default): [`BitcodeCodec`] via `bitcode`

mod codec;
mod error;
pub mod routing;
mod types;

pub use codec::{CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON, Codec, media_type_matches};
#[cfg(feature = "binary")]
pub use codec::BitcodeCodec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ArmyMove, GameLog, Location, Player, PlayingState, RecognitionOfWar, Unit, UnitRank,
};
