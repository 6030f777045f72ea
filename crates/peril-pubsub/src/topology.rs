//! Queue declaration and binding.

use peril_broker::{BrokerError, Channel, Connection, ExchangeKind, QueueInfo, QueueOptions};
use peril_protocol::routing::{
    EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC, QUEUE_PERIL_DLQ,
};
use tracing::{debug, info};

use crate::PubSubError;

/// How long a queue lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDurability {
    /// Survives broker restarts; shared between consumers.
    Durable,
    /// Private to one connection and deleted with it, or when its last
    /// consumer goes away.
    Transient,
}

impl QueueDurability {
    /// Broker flags for this durability class.
    pub fn queue_options(self, dead_letter_exchange: Option<&str>) -> QueueOptions {
        let transient = self == Self::Transient;
        QueueOptions {
            durable: !transient,
            auto_delete: transient,
            exclusive: transient,
            dead_letter_exchange: dead_letter_exchange.map(str::to_string),
        }
    }
}

/// Opens a fresh channel, declares `queue_name` and binds it to `exchange`
/// under `binding_key`.
///
/// An empty `queue_name` asks the broker to generate one; the returned
/// [`QueueInfo::name`] is the name to consume from. On any failure the
/// fresh channel is closed before the error is returned, so a caller never
/// holds a channel whose queue is only half set up.
pub async fn declare_and_bind<C: Connection>(
    conn: &C,
    exchange: &str,
    queue_name: &str,
    binding_key: &str,
    durability: QueueDurability,
    dead_letter_exchange: Option<&str>,
) -> Result<(C::Channel, QueueInfo), PubSubError> {
    let channel = conn
        .create_channel()
        .await
        .map_err(|e| PubSubError::topology(exchange, queue_name, e))?;

    let options = durability.queue_options(dead_letter_exchange);
    let declared = async {
        let queue = channel.declare_queue(queue_name, options).await?;
        channel.bind_queue(&queue.name, exchange, binding_key).await?;
        Ok::<_, BrokerError>(queue)
    };

    match declared.await {
        Ok(queue) => {
            debug!(
                queue = %queue.name,
                exchange,
                binding_key,
                ?durability,
                "queue declared and bound"
            );
            Ok((channel, queue))
        }
        Err(source) => {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "closing channel after failed declaration");
            }
            Err(PubSubError::topology(exchange, queue_name, source))
        }
    }
}

/// Declares the game's exchanges and the dead-letter queue.
///
/// `peril_direct` (direct), `peril_topic` (topic) and `peril_dlx` (fanout)
/// are all durable; `peril_dlq` is a durable queue bound to `peril_dlx`.
/// Safe to call from every process at startup.
pub async fn declare_exchanges<C: Connection>(conn: &C) -> Result<(), PubSubError> {
    let channel = conn.create_channel().await?;
    let result = async {
        channel
            .declare_exchange(EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct, true)
            .await?;
        channel
            .declare_exchange(EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic, true)
            .await?;
        channel
            .declare_exchange(EXCHANGE_PERIL_DLX, ExchangeKind::Fanout, true)
            .await?;
        let dlq = QueueDurability::Durable.queue_options(None);
        channel.declare_queue(QUEUE_PERIL_DLQ, dlq).await?;
        channel
            .bind_queue(QUEUE_PERIL_DLQ, EXCHANGE_PERIL_DLX, "")
            .await
    }
    .await;

    let closed = channel.close().await;
    result?;
    closed?;
    info!("exchanges declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_options() {
        let opts = QueueDurability::Durable.queue_options(Some("peril_dlx"));
        assert!(opts.durable);
        assert!(!opts.auto_delete);
        assert!(!opts.exclusive);
        assert_eq!(opts.dead_letter_exchange.as_deref(), Some("peril_dlx"));
    }

    #[test]
    fn test_transient_options() {
        let opts = QueueDurability::Transient.queue_options(None);
        assert!(!opts.durable);
        assert!(opts.auto_delete);
        assert!(opts.exclusive);
        assert_eq!(opts.dead_letter_exchange, None);
    }
}
