//! Encoding and publishing typed values.

use std::sync::Arc;

use peril_broker::{Channel, OutboundMessage};
use peril_protocol::{BitcodeCodec, Codec, JsonCodec};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::trace;

use crate::PubSubError;

/// Encodes `value` with `codec` and publishes it to `exchange` under
/// `routing_key`, tagged with the codec's content type.
///
/// Encoding happens first: a value that fails to serialize returns
/// [`PubSubError::Encode`] and the broker is never called. The call does
/// not wait for a broker confirmation.
pub async fn publish<Ch, C, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
    codec: &C,
) -> Result<(), PubSubError>
where
    Ch: Channel,
    C: Codec,
    T: Serialize + ?Sized,
{
    let message = encode(value, codec)?;
    send(channel, exchange, routing_key, message).await
}

/// [`publish`] with [`JsonCodec`].
pub async fn publish_json<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    Ch: Channel,
    T: Serialize + ?Sized,
{
    publish(channel, exchange, routing_key, value, &JsonCodec).await
}

/// [`publish`] with [`BitcodeCodec`].
pub async fn publish_binary<Ch, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError>
where
    Ch: Channel,
    T: Serialize + ?Sized,
{
    publish(channel, exchange, routing_key, value, &BitcodeCodec).await
}

fn encode<C: Codec, T: Serialize + ?Sized>(
    value: &T,
    codec: &C,
) -> Result<OutboundMessage, PubSubError> {
    let payload = codec.encode(&value).map_err(PubSubError::Encode)?;
    Ok(OutboundMessage::new(codec.content_type(), payload))
}

async fn send<Ch: Channel>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    message: OutboundMessage,
) -> Result<(), PubSubError> {
    let len = message.payload.len();
    channel.publish(exchange, routing_key, message).await?;
    trace!(exchange, routing_key, bytes = len, "published");
    Ok(())
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// A publishing channel that can be shared between tasks.
///
/// A broker channel must not carry two publishes at once, so clones of a
/// `Publisher` take turns on one channel behind an async mutex. Values are
/// encoded before the lock is taken.
pub struct Publisher<Ch> {
    channel: Arc<Mutex<Ch>>,
}

impl<Ch> Clone for Publisher<Ch> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<Ch: Channel> Publisher<Ch> {
    /// Wraps a channel dedicated to publishing.
    pub fn new(channel: Ch) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
        }
    }

    /// See [`publish`].
    pub async fn publish<C, T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &C,
    ) -> Result<(), PubSubError>
    where
        C: Codec,
        T: Serialize + ?Sized,
    {
        let message = encode(value, codec)?;
        let channel = self.channel.lock().await;
        send(&*channel, exchange, routing_key, message).await
    }

    /// See [`publish_json`].
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PubSubError> {
        self.publish(exchange, routing_key, value, &JsonCodec).await
    }

    /// See [`publish_binary`].
    pub async fn publish_binary<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PubSubError> {
        self.publish(exchange, routing_key, value, &BitcodeCodec).await
    }

    /// Closes the underlying channel. Every clone fails afterwards.
    pub async fn close(&self) -> Result<(), PubSubError> {
        self.channel.lock().await.close().await?;
        Ok(())
    }
}
