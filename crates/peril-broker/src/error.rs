/// Errors that can occur in the broker layer.
///
/// The variants mirror the AMQP reply codes a broker answers with when it
/// refuses an operation, so callers can react the same way regardless of
/// which backend produced the error.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The connection was closed (by us or by the broker).
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel was closed. Pending acknowledgments on it are void.
    #[error("channel closed")]
    ChannelClosed,

    /// An exchange or queue does not exist (AMQP 404).
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// `"exchange"` or `"queue"`.
        kind: &'static str,
        /// Name that was looked up.
        name: String,
    },

    /// A redeclaration disagrees with the existing entity (AMQP 406).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An exclusive queue is owned by another connection (AMQP 405).
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// The operation is not permitted, e.g. binding to the default exchange (AMQP 403).
    #[error("access refused: {0}")]
    AccessRefused(String),

    /// Error reported by the AMQP client library.
    #[cfg(feature = "amqp")]
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl BrokerError {
    pub(crate) fn queue_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "queue",
            name: name.to_string(),
        }
    }

    pub(crate) fn exchange_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "exchange",
            name: name.to_string(),
        }
    }
}
