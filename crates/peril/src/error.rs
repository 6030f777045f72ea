//! Unified error type for the Peril messaging stack.

use peril_broker::BrokerError;
use peril_protocol::ProtocolError;
use peril_pubsub::PubSubError;

/// Top-level error that wraps every crate-specific error.
///
/// Callers of the `peril` crate deal with this single type; `?` converts
/// sub-crate errors through the generated `From` impls.
#[derive(Debug, thiserror::Error)]
pub enum PerilError {
    /// A broker-level error (connection, channel, declaration).
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// An encode or decode error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A publish, subscribe or topology error.
    #[error(transparent)]
    PubSub(#[from] PubSubError),

    /// Settings could not be loaded.
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use peril_protocol::{Codec, JsonCodec, PlayingState};

    #[test]
    fn test_from_broker_error() {
        let err = BrokerError::NotFound {
            kind: "queue",
            name: "gone".into(),
        };
        let peril_err: PerilError = err.into();
        assert!(matches!(peril_err, PerilError::Broker(_)));
        assert!(peril_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = JsonCodec.decode::<PlayingState>(b"{").unwrap_err();
        let peril_err: PerilError = err.into();
        assert!(matches!(peril_err, PerilError::Protocol(ref e) if e.is_decode()));
        assert!(peril_err.to_string().starts_with("decode failed"));
    }

    #[test]
    fn test_from_pubsub_error() {
        let err = PubSubError::Broker(BrokerError::ChannelClosed);
        let peril_err: PerilError = err.into();
        assert!(matches!(peril_err, PerilError::PubSub(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err = config::ConfigError::Message("missing".into());
        let peril_err: PerilError = err.into();
        assert!(matches!(peril_err, PerilError::Config(_)));
        assert!(peril_err.to_string().starts_with("configuration"));
    }
}
