//! Acknowledgment decisions and how they map onto broker operations.
//!
//! A handler answers every decoded delivery with an [`AckType`]. The
//! delivery loop turns that into exactly one [`BrokerAction`] and applies
//! it. [`DeliveryState`] models the life of a single delivery so the
//! "settled exactly once" rule can be checked without a broker.

use std::fmt;

use peril_broker::{BrokerError, Delivery};
use tracing::warn;

/// What a handler wants done with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckType {
    /// Processed; remove the message.
    Ack,
    /// Transient failure; put the message back for redelivery.
    NackRequeue,
    /// Permanent failure; drop or dead-letter the message.
    NackDiscard,
}

impl AckType {
    /// Maps a raw decision code (`0` ack, `1` requeue, `2` discard).
    ///
    /// Any other code is not a decision the loop can trust and is treated
    /// as [`AckType::NackDiscard`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ack,
            1 => Self::NackRequeue,
            2 => Self::NackDiscard,
            other => {
                warn!(code = other, "unknown acknowledgment code, discarding");
                Self::NackDiscard
            }
        }
    }

    /// The raw code for this decision.
    pub fn code(self) -> u8 {
        match self {
            Self::Ack => 0,
            Self::NackRequeue => 1,
            Self::NackDiscard => 2,
        }
    }
}

impl fmt::Display for AckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "Ack"),
            Self::NackRequeue => write!(f, "NackRequeue"),
            Self::NackDiscard => write!(f, "NackDiscard"),
        }
    }
}

/// The broker operation a decision resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    Ack,
    Nack { requeue: bool },
}

impl From<AckType> for BrokerAction {
    fn from(decision: AckType) -> Self {
        match decision {
            AckType::Ack => Self::Ack,
            AckType::NackRequeue => Self::Nack { requeue: true },
            AckType::NackDiscard => Self::Nack { requeue: false },
        }
    }
}

impl BrokerAction {
    /// Settles `delivery` on the broker. Consumes it, so no delivery can be
    /// settled twice.
    pub async fn apply<D: Delivery>(self, delivery: D) -> Result<(), BrokerError> {
        match self {
            Self::Ack => delivery.ack().await,
            Self::Nack { requeue } => delivery.nack(requeue).await,
        }
    }
}

/// Lifecycle of one delivery.
///
/// ```text
/// Delivered ──Ack──────────▶ Acked
///     │  ╲──NackDiscard────▶ Discarded
///     ╰────NackRequeue─────▶ Requeued ──broker redelivers──▶ Delivered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Delivered,
    Acked,
    Requeued,
    Discarded,
}

impl DeliveryState {
    /// Applies a decision. Only a `Delivered` message can be settled;
    /// every other state returns `None`.
    pub fn apply(self, decision: AckType) -> Option<Self> {
        match (self, decision) {
            (Self::Delivered, AckType::Ack) => Some(Self::Acked),
            (Self::Delivered, AckType::NackRequeue) => Some(Self::Requeued),
            (Self::Delivered, AckType::NackDiscard) => Some(Self::Discarded),
            _ => None,
        }
    }

    /// The broker hands a requeued message out again.
    pub fn redeliver(self) -> Option<Self> {
        match self {
            Self::Requeued => Some(Self::Delivered),
            _ => None,
        }
    }

    /// `true` once the message has left the queue for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acked | Self::Discarded)
    }
}
