//! Subscriptions: one task per queue that decodes deliveries, asks a
//! handler for a decision, and settles each delivery before reading the
//! next.
//!
//! # Life of a delivery
//!
//! ```text
//! consumer.next()
//!     │
//!     ├─ content-type tag not accepted by the codec ──► nack, no requeue
//!     ├─ payload fails to decode ─────────────────────► nack, no requeue
//!     └─ handler(value) ──► AckType ──► BrokerAction ──► ack / nack
//! ```
//!
//! Exactly one broker action is applied per delivery, and the loop does
//! not read the next delivery until it has. Messages from one queue thus
//! reach the handler strictly in delivery order, one at a time. Running
//! several queues concurrently means several subscriptions.
//!
//! A nack without requeue sends the message to the queue's dead-letter
//! exchange when one is configured, and drops it otherwise.
//!
//! # Shutting down
//!
//! [`Subscription::close`] signals the loop and waits for it. A handler
//! already running finishes and its decision is applied; deliveries the
//! broker had buffered but the loop had not read yet stay unacknowledged
//! and return to the queue when the loop closes its channel.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use peril_broker::{Channel, Connection, Consumer, Delivery};
use peril_protocol::{BitcodeCodec, Codec, JsonCodec};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ack::{AckType, BrokerAction};
use crate::topology::{QueueDurability, declare_and_bind};
use crate::{PubSubConfig, PubSubError};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Decides what happens to each decoded delivery.
///
/// Implemented for every `FnMut(T) -> impl Future<Output = AckType>`, so a
/// closure returning an `async move` block is the usual handler:
///
/// ```rust
/// use peril_pubsub::{AckType, Handler};
/// use peril_protocol::PlayingState;
///
/// fn accepts_handler<H: Handler<PlayingState>>(_: H) {}
///
/// accepts_handler(|state: PlayingState| async move {
///     println!("paused: {}", state.is_paused);
///     AckType::Ack
/// });
/// ```
pub trait Handler<T>: Send + 'static {
    /// Handles one decoded value. A panic here is caught by the delivery
    /// loop and treated as [`AckType::NackDiscard`].
    fn handle(&mut self, value: T) -> impl Future<Output = AckType> + Send;
}

impl<T, F, Fut> Handler<T> for F
where
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = AckType> + Send,
{
    fn handle(&mut self, value: T) -> impl Future<Output = AckType> + Send {
        self(value)
    }
}

// ---------------------------------------------------------------------------
// Options / stats
// ---------------------------------------------------------------------------

/// Per-subscription settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Unacknowledged deliveries the broker may hand this subscription at
    /// once. `None` leaves the channel's default.
    pub prefetch: Option<u16>,
    /// Dead-letter exchange for the declared queue.
    pub dead_letter_exchange: Option<String>,
}

impl SubscribeOptions {
    /// Options for a JSON subscription under `config`, after
    /// [`PubSubConfig::validated`].
    pub fn json(config: &PubSubConfig) -> Self {
        let config = config.clone().validated();
        Self {
            prefetch: config.json_prefetch,
            dead_letter_exchange: config.dead_letter_exchange,
        }
    }

    /// Options for a binary subscription under `config`. Always bounded.
    pub fn binary(config: &PubSubConfig) -> Self {
        let config = config.clone().validated();
        Self {
            prefetch: Some(config.binary_prefetch),
            dead_letter_exchange: config.dead_letter_exchange,
        }
    }

    /// Overrides the prefetch.
    pub fn with_prefetch(mut self, count: u16) -> Self {
        self.prefetch = Some(count);
        self
    }
}

/// What a finished subscription did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Deliveries read from the broker.
    pub delivered: u64,
    /// Deliveries acknowledged.
    pub acked: u64,
    /// Deliveries rejected with requeue.
    pub requeued: u64,
    /// Deliveries rejected without requeue, for any reason.
    pub discarded: u64,
    /// Of `discarded`: wrong content type, handler not invoked.
    pub rejected_content_type: u64,
    /// Of `discarded`: payload failed to decode, handler not invoked.
    pub poison: u64,
    /// Of `discarded`: the handler panicked.
    pub handler_panics: u64,
    /// Ack/nack calls the broker refused.
    pub settle_failures: u64,
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle to a running subscription.
///
/// Dropping the handle leaves the subscription running until its channel
/// or connection closes.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<SubscriptionStats>,
}

impl Subscription {
    /// The queue being consumed (server-generated names resolved).
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// `true` once the delivery loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the delivery loop to exit on its own (channel or
    /// connection closed) and returns its stats.
    pub async fn join(self) -> Result<SubscriptionStats, PubSubError> {
        Ok(self.task.await?)
    }

    /// Stops consuming: the loop finishes the delivery in hand, closes its
    /// channel and exits.
    pub async fn close(self) -> Result<SubscriptionStats, PubSubError> {
        // A send error means the loop is already gone.
        let _ = self.shutdown.send(true);
        self.join().await
    }
}

// ---------------------------------------------------------------------------
// subscribe
// ---------------------------------------------------------------------------

/// Declares and binds `queue_name`, then spawns a task that feeds every
/// delivery through `codec` into `handler`.
///
/// Setup runs before anything is spawned: declaration, prefetch and
/// `consume`. If any of them fails the channel is closed and the error is
/// returned.
///
/// Per delivery, in order:
/// 1. a content-type tag the codec does not accept → nack without requeue,
///    handler not invoked (a missing tag is let through to decoding);
/// 2. a payload that fails to decode → nack without requeue, handler not
///    invoked;
/// 3. otherwise the handler's decision is applied, and a panicking handler
///    counts as [`AckType::NackDiscard`].
///
/// Each delivery is settled exactly once before the next one is read.
#[allow(clippy::too_many_arguments)]
pub async fn subscribe<Conn, C, T, H>(
    conn: &Conn,
    exchange: &str,
    queue_name: &str,
    binding_key: &str,
    durability: QueueDurability,
    codec: C,
    options: SubscribeOptions,
    handler: H,
) -> Result<Subscription, PubSubError>
where
    Conn: Connection,
    C: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    let (channel, queue) = declare_and_bind(
        conn,
        exchange,
        queue_name,
        binding_key,
        durability,
        options.dead_letter_exchange.as_deref(),
    )
    .await?;

    let consumer = match start_consuming(&channel, &queue.name, options.prefetch).await {
        Ok(consumer) => consumer,
        Err(e) => {
            if let Err(close_err) = channel.close().await {
                debug!(error = %close_err, "closing channel after failed consume");
            }
            return Err(e.into());
        }
    };

    info!(
        queue = %queue.name,
        exchange,
        binding_key,
        prefetch = ?options.prefetch,
        content_type = codec.content_type(),
        "subscription started"
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let delivery_loop = DeliveryLoop {
        queue: queue.name.clone(),
        codec,
        handler,
        stats: SubscriptionStats::default(),
        _payload: std::marker::PhantomData,
    };
    let task = tokio::spawn(delivery_loop.run(channel, consumer, shutdown_rx));

    Ok(Subscription {
        queue: queue.name,
        shutdown,
        task,
    })
}

/// [`subscribe`] with [`JsonCodec`] and [`SubscribeOptions::json`].
pub async fn subscribe_json<Conn, T, H>(
    conn: &Conn,
    exchange: &str,
    queue_name: &str,
    binding_key: &str,
    durability: QueueDurability,
    config: &PubSubConfig,
    handler: H,
) -> Result<Subscription, PubSubError>
where
    Conn: Connection,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(
        conn,
        exchange,
        queue_name,
        binding_key,
        durability,
        JsonCodec,
        SubscribeOptions::json(config),
        handler,
    )
    .await
}

/// [`subscribe`] with [`BitcodeCodec`] and [`SubscribeOptions::binary`].
pub async fn subscribe_binary<Conn, T, H>(
    conn: &Conn,
    exchange: &str,
    queue_name: &str,
    binding_key: &str,
    durability: QueueDurability,
    config: &PubSubConfig,
    handler: H,
) -> Result<Subscription, PubSubError>
where
    Conn: Connection,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(
        conn,
        exchange,
        queue_name,
        binding_key,
        durability,
        BitcodeCodec,
        SubscribeOptions::binary(config),
        handler,
    )
    .await
}

async fn start_consuming<Ch: Channel>(
    channel: &Ch,
    queue: &str,
    prefetch: Option<u16>,
) -> Result<Ch::Consumer, peril_broker::BrokerError> {
    if let Some(count) = prefetch {
        channel.set_prefetch(count).await?;
    }
    channel.consume(queue).await
}

// ---------------------------------------------------------------------------
// Delivery loop
// ---------------------------------------------------------------------------

/// Why a delivery never reached the handler, or what the handler said.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Decided(AckType),
    Panicked,
    WrongContentType,
    Poison,
}

impl Disposition {
    fn action(self) -> BrokerAction {
        match self {
            Self::Decided(decision) => decision.into(),
            Self::Panicked => AckType::NackDiscard.into(),
            Self::WrongContentType | Self::Poison => BrokerAction::Nack { requeue: false },
        }
    }
}

struct DeliveryLoop<C, T, H> {
    queue: String,
    codec: C,
    handler: H,
    stats: SubscriptionStats,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<C, T, H> DeliveryLoop<C, T, H>
where
    C: Codec,
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn run<Ch: Channel>(
        mut self,
        channel: Ch,
        mut consumer: Ch::Consumer,
        mut shutdown: watch::Receiver<bool>,
    ) -> SubscriptionStats {
        let mut listening = true;
        loop {
            // Shutdown is polled first so a close wins over buffered deliveries.
            let next = tokio::select! {
                biased;
                changed = shutdown.changed(), if listening => {
                    match changed {
                        Ok(()) => {
                            debug!(queue = %self.queue, "subscription close requested");
                            break;
                        }
                        // Handle dropped: keep consuming until the channel closes.
                        Err(_) => {
                            listening = false;
                            continue;
                        }
                    }
                }
                next = consumer.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(delivery).await,
                Some(Err(e)) => {
                    warn!(queue = %self.queue, error = %e, "delivery stream error");
                }
                None => {
                    debug!(queue = %self.queue, "delivery stream closed");
                    break;
                }
            }
        }

        if let Err(e) = channel.close().await {
            debug!(queue = %self.queue, error = %e, "closing subscription channel");
        }
        info!(
            queue = %self.queue,
            delivered = self.stats.delivered,
            acked = self.stats.acked,
            requeued = self.stats.requeued,
            discarded = self.stats.discarded,
            "subscription ended"
        );
        self.stats
    }

    async fn process<D: Delivery>(&mut self, delivery: D) {
        self.stats.delivered += 1;
        let disposition = self.decide(&delivery).await;
        let action = disposition.action();

        match disposition {
            Disposition::Decided(_) => {}
            Disposition::Panicked => self.stats.handler_panics += 1,
            Disposition::WrongContentType => self.stats.rejected_content_type += 1,
            Disposition::Poison => self.stats.poison += 1,
        }
        match action {
            BrokerAction::Ack => self.stats.acked += 1,
            BrokerAction::Nack { requeue: true } => self.stats.requeued += 1,
            BrokerAction::Nack { requeue: false } => self.stats.discarded += 1,
        }

        let routing_key = delivery.routing_key().to_string();
        debug!(queue = %self.queue, %routing_key, ?disposition, "settling delivery");
        if let Err(e) = action.apply(delivery).await {
            self.stats.settle_failures += 1;
            warn!(
                queue = %self.queue,
                %routing_key,
                ?action,
                error = %e,
                "failed to settle delivery"
            );
        }
    }

    async fn decide<D: Delivery>(&mut self, delivery: &D) -> Disposition {
        if let Some(tag) = delivery.content_type() {
            if !self.codec.accepts(tag) {
                warn!(
                    queue = %self.queue,
                    routing_key = delivery.routing_key(),
                    content_type = tag,
                    expected = self.codec.content_type(),
                    "unexpected content type, discarding"
                );
                return Disposition::WrongContentType;
            }
        }

        let value: T = match self.codec.decode(delivery.payload()) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    routing_key = delivery.routing_key(),
                    error = %e,
                    "undecodable payload, discarding"
                );
                return Disposition::Poison;
            }
        };

        let handler = &mut self.handler;
        let outcome = AssertUnwindSafe(async move { handler.handle(value).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(decision) => Disposition::Decided(decision),
            Err(_) => {
                warn!(
                    queue = %self.queue,
                    routing_key = delivery.routing_key(),
                    "handler panicked, discarding"
                );
                Disposition::Panicked
            }
        }
    }
}
