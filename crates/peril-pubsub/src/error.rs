//! Error types for the messaging core.

use peril_broker::BrokerError;
use peril_protocol::ProtocolError;

/// Errors returned by topology, publish and subscribe calls.
///
/// Per-delivery failures inside a running subscription never surface here;
/// they are logged and settled on the broker instead.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// Declaring or binding a queue failed. The channel opened for the
    /// declaration has already been closed.
    #[error("failed to declare/bind queue '{queue}' on exchange '{exchange}': {source}")]
    Topology {
        exchange: String,
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// The value could not be serialized; nothing was sent.
    #[error("encode failed: {0}")]
    Encode(#[source] ProtocolError),

    /// A broker call outside of declaration failed (publish, prefetch,
    /// consume, close).
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The subscription task panicked or was aborted.
    #[error("subscription task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PubSubError {
    pub(crate) fn topology(exchange: &str, queue: &str, source: BrokerError) -> Self {
        Self::Topology {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            source,
        }
    }
}
