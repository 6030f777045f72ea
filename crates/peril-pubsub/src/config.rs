//! Messaging-core settings.

use peril_protocol::routing::EXCHANGE_PERIL_DLX;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings shared by every subscription and declaration.
///
/// Fields missing from a configuration source fall back to [`Default`],
/// so a partial `[pubsub]` table is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Exchange that queues dead-letter rejected messages to.
    /// `None` declares queues without the dead-letter argument.
    pub dead_letter_exchange: Option<String>,

    /// Prefetch applied to binary (high-volume) subscriptions. Never 0.
    pub binary_prefetch: u16,

    /// Prefetch applied to JSON subscriptions. `None` leaves the broker's
    /// default (unbounded) in place.
    pub json_prefetch: Option<u16>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            dead_letter_exchange: Some(EXCHANGE_PERIL_DLX.to_string()),
            binary_prefetch: Self::DEFAULT_BINARY_PREFETCH,
            json_prefetch: None,
        }
    }
}

impl PubSubConfig {
    /// Default prefetch for binary subscriptions.
    pub const DEFAULT_BINARY_PREFETCH: u16 = 10;

    /// Sets the dead-letter exchange.
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    /// Declares queues without a dead-letter exchange.
    pub fn without_dead_letter_exchange(mut self) -> Self {
        self.dead_letter_exchange = None;
        self
    }

    /// Sets the prefetch for binary subscriptions.
    pub fn with_binary_prefetch(mut self, count: u16) -> Self {
        self.binary_prefetch = count;
        self
    }

    /// Bounds JSON subscriptions with a prefetch as well.
    pub fn with_json_prefetch(mut self, count: u16) -> Self {
        self.json_prefetch = Some(count);
        self
    }

    /// Fix any out-of-range values so the config is safe to use.
    ///
    /// - `binary_prefetch = 0` would mean "unbounded" to the broker; it is
    ///   reset to [`Self::DEFAULT_BINARY_PREFETCH`].
    /// - An empty dead-letter exchange name is treated as none.
    pub fn validated(mut self) -> Self {
        if self.binary_prefetch == 0 {
            warn!(
                default = Self::DEFAULT_BINARY_PREFETCH,
                "binary_prefetch of 0 would leave binary subscriptions unbounded, using default"
            );
            self.binary_prefetch = Self::DEFAULT_BINARY_PREFETCH;
        }
        if self.dead_letter_exchange.as_deref() == Some("") {
            self.dead_letter_exchange = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PubSubConfig::default();
        assert_eq!(config.dead_letter_exchange.as_deref(), Some("peril_dlx"));
        assert_eq!(config.binary_prefetch, 10);
        assert_eq!(config.json_prefetch, None);
    }

    #[test]
    fn test_builder_methods() {
        let config = PubSubConfig::default()
            .without_dead_letter_exchange()
            .with_binary_prefetch(50)
            .with_json_prefetch(5);
        assert_eq!(config.dead_letter_exchange, None);
        assert_eq!(config.binary_prefetch, 50);
        assert_eq!(config.json_prefetch, Some(5));

        let config = config.with_dead_letter_exchange("other_dlx");
        assert_eq!(config.dead_letter_exchange.as_deref(), Some("other_dlx"));
    }

    #[test]
    fn test_validated_resets_zero_binary_prefetch() {
        let config = PubSubConfig::default().with_binary_prefetch(0).validated();
        assert_eq!(config.binary_prefetch, PubSubConfig::DEFAULT_BINARY_PREFETCH);
    }

    #[test]
    fn test_validated_drops_empty_dead_letter_exchange() {
        let config = PubSubConfig::default()
            .with_dead_letter_exchange("")
            .validated();
        assert_eq!(config.dead_letter_exchange, None);
    }

    #[test]
    fn test_validated_keeps_sane_values() {
        let config = PubSubConfig::default().with_binary_prefetch(3).validated();
        assert_eq!(config, PubSubConfig::default().with_binary_prefetch(3));
    }
}
