//! Broker abstraction layer for Peril.
//!
//! Provides the [`Connection`], [`Channel`], [`Consumer`] and [`Delivery`]
//! traits that abstract over an AMQP-style message broker: exchanges route
//! published messages to bound queues, consumers read deliveries from a
//! queue, and every delivery carries exactly one pending acknowledgment.
//!
//! # Feature Flags
//!
//! - `memory` (default): in-process broker with AMQP-like semantics
//! - `amqp`: AMQP 0-9-1 backend via `lapin`
//!
//! # Send futures
//!
//! Every async method is declared as `fn .. -> impl Future + Send` rather
//! than `async fn`, so code that is generic over a backend can still move
//! consumers and channels into `tokio::spawn`. Implementations are free to
//! write the methods as plain `async fn`.

#[cfg(feature = "amqp")]
mod amqp;
mod error;
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "memory")]
mod topic;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnection, AmqpConsumer, AmqpDelivery};
pub use error::BrokerError;
#[cfg(feature = "memory")]
pub use memory::{
    MemoryBroker, MemoryChannel, MemoryConnection, MemoryConsumer, MemoryDelivery,
};
#[cfg(feature = "memory")]
pub use topic::topic_matches;

use std::fmt;
use std::future::Future;

/// Opaque identifier for a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How an exchange matches routing keys against bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// Dot-separated pattern match (`*` = one word, `#` = zero or more).
    Topic,
    /// Every bound queue, key ignored.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        };
        f.write_str(name)
    }
}

/// Queue declaration flags.
///
/// Two declarations of the same queue name must agree on every field,
/// otherwise the broker refuses the second one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Deleted once its last consumer is cancelled.
    pub auto_delete: bool,
    /// Usable only by the declaring connection; deleted when it closes.
    pub exclusive: bool,
    /// Exchange that rejected (non-requeued) messages are re-published to.
    pub dead_letter_exchange: Option<String>,
}

/// What the broker reports back after a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// The queue name. Authoritative when a server-generated name was requested.
    pub name: String,
    /// Ready (not yet delivered) messages.
    pub message_count: u32,
    /// Active consumers.
    pub consumer_count: u32,
}

/// A message on its way to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Content-type tag naming the encoding of `payload`.
    pub content_type: String,
    /// Encoded body.
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Creates a message with the given content type and payload.
    pub fn new(content_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            payload,
        }
    }
}

/// A connection to a broker. Channels are multiplexed on top of it.
pub trait Connection: Send + Sync + 'static {
    /// The channel type produced by this connection.
    type Channel: Channel;

    /// Opens a new channel on this connection.
    fn create_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;

    /// Closes the connection and every channel opened on it.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// A lightweight session on a connection.
///
/// A channel must not be used for concurrent publishes from several tasks
/// without external synchronization; interleaved frames corrupt its state.
pub trait Channel: Send + Sync + 'static {
    /// The consumer type produced by [`consume`](Self::consume).
    type Consumer: Consumer;

    /// Declares an exchange. Idempotent for identical parameters.
    fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Declares a queue. An empty `name` asks the broker to generate one.
    fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> impl Future<Output = Result<QueueInfo, BrokerError>> + Send;

    /// Binds `queue` to `exchange` under `routing_key`.
    fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Limits unacknowledged deliveries per consumer subsequently started
    /// on this channel. `0` means unlimited.
    fn set_prefetch(&self, count: u16) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Publishes a message without waiting for any confirmation.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Starts consuming from `queue` with manual acknowledgment.
    fn consume(&self, queue: &str) -> impl Future<Output = Result<Self::Consumer, BrokerError>> + Send;

    /// Closes the channel. Its consumers' streams end.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A stream of deliveries from one queue.
pub trait Consumer: Send + 'static {
    /// The delivery type yielded by this consumer.
    type Delivery: Delivery;

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the stream is closed (channel or connection
    /// closed, or the consumer was cancelled).
    fn next(&mut self) -> impl Future<Output = Option<Result<Self::Delivery, BrokerError>>> + Send;
}

/// One delivered message plus its pending acknowledgment.
///
/// `ack` and `nack` take `self` by value: the obligation is settled exactly
/// once and the compiler rejects a second settlement.
pub trait Delivery: Send + Sync + Sized + 'static {
    /// Content-type tag set by the publisher, if any.
    fn content_type(&self) -> Option<&str>;

    /// Encoded body.
    fn payload(&self) -> &[u8];

    /// Routing key the message was published with.
    fn routing_key(&self) -> &str;

    /// `true` if the broker delivered this message before.
    fn redelivered(&self) -> bool;

    /// Acknowledges the delivery; the broker forgets the message.
    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Rejects the delivery. With `requeue` the broker will redeliver it,
    /// otherwise it is dead-lettered (if configured) or dropped.
    fn nack(self, requeue: bool) -> impl Future<Output = Result<(), BrokerError>> + Send;
}
