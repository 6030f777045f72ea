//! In-process broker with AMQP-like semantics.
//!
//! [`MemoryBroker`] keeps exchanges, queues, consumers and unacknowledged
//! deliveries behind one async mutex. It is what the test suites run
//! against, and it is good enough to play a single-process game without a
//! RabbitMQ server.
//!
//! Semantics follow AMQP 0-9-1 where it matters for at-least-once delivery:
//! prefetch per consumer, requeue-to-head with the redelivered flag,
//! dead-lettering of rejected messages, requeue of unacknowledged messages
//! when a channel closes, exclusive and auto-delete queues.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::{Mutex, mpsc};

use crate::topic::topic_matches;
use crate::{
    BrokerError, Channel, Connection, ConnectionId, Consumer, Delivery, ExchangeKind,
    OutboundMessage, QueueInfo, QueueOptions,
};

/// Counter for generating unique connection, channel and consumer IDs.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Server-generated queue name, in the same shape RabbitMQ uses.
fn generated_queue_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(22)
        .map(char::from)
        .collect();
    format!("amq.gen-{suffix}")
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Broker state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    content_type: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    /// `(queue, binding key)` pairs.
    bindings: Vec<(String, String)>,
}

#[derive(Debug)]
struct QueueState {
    options: QueueOptions,
    owner: Option<ConnectionId>,
    ready: VecDeque<StoredMessage>,
    /// Consumer IDs in round-robin order.
    consumers: Vec<u64>,
    next_consumer: usize,
}

impl QueueState {
    fn info(&self, name: &str) -> QueueInfo {
        QueueInfo {
            name: name.to_string(),
            message_count: saturating_u32(self.ready.len()),
            consumer_count: saturating_u32(self.consumers.len()),
        }
    }

    fn locked_for(&self, connection: ConnectionId) -> bool {
        self.options.exclusive && self.owner != Some(connection)
    }
}

#[derive(Debug)]
struct ConsumerState {
    queue: String,
    channel: u64,
    prefetch: u16,
    /// Delivery tag → message, for everything delivered but not settled.
    unacked: HashMap<u64, StoredMessage>,
    sender: mpsc::UnboundedSender<MemoryDelivery>,
}

impl ConsumerState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < usize::from(self.prefetch)
    }
}

#[derive(Debug)]
struct ChannelState {
    connection: ConnectionId,
    prefetch: u16,
    consumers: Vec<u64>,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// Back-reference handed to deliveries so they can settle later.
    handle: Weak<Mutex<BrokerState>>,
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    /// Open connections and the channels opened on each.
    connections: HashMap<ConnectionId, Vec<u64>>,
    channels: HashMap<u64, ChannelState>,
    consumers: HashMap<u64, ConsumerState>,
    next_delivery_tag: u64,
}

impl BrokerState {
    fn channel(&self, id: u64) -> Result<&ChannelState, BrokerError> {
        self.channels.get(&id).ok_or(BrokerError::ChannelClosed)
    }

    /// Resolves the queues a message published to `exchange` with
    /// `routing_key` lands in. Each queue appears at most once.
    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange.is_empty() {
            // Default exchange: every queue is implicitly bound by its name.
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let ex = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;

        let mut targets: Vec<String> = Vec::new();
        for (queue, key) in &ex.bindings {
            let matched = match ex.kind {
                ExchangeKind::Direct => key == routing_key,
                ExchangeKind::Topic => topic_matches(key, routing_key),
                ExchangeKind::Fanout => true,
            };
            if matched && !targets.contains(queue) {
                targets.push(queue.clone());
            }
        }
        Ok(targets)
    }

    /// Appends `message` to every queue it routes to and dispatches.
    fn enqueue(&mut self, exchange: &str, message: StoredMessage) -> Result<(), BrokerError> {
        let targets = self.route(exchange, &message.routing_key)?;
        if targets.is_empty() {
            tracing::trace!(exchange, key = %message.routing_key, "unroutable message dropped");
        }
        for queue in targets {
            if let Some(q) = self.queues.get_mut(&queue) {
                q.ready.push_back(message.clone());
            }
            self.dispatch(&queue);
        }
        Ok(())
    }

    /// Hands ready messages of `queue` to consumers with spare prefetch
    /// capacity, round-robin, until either runs out.
    fn dispatch(&mut self, queue: &str) {
        loop {
            let Some(q) = self.queues.get_mut(queue) else {
                return;
            };
            if q.ready.is_empty() || q.consumers.is_empty() {
                return;
            }

            let n = q.consumers.len();
            let chosen = (0..n).map(|i| (q.next_consumer + i) % n).find(|&idx| {
                self.consumers
                    .get(&q.consumers[idx])
                    .is_some_and(ConsumerState::has_capacity)
            });
            let Some(idx) = chosen else {
                return;
            };
            let consumer_id = q.consumers[idx];
            q.next_consumer = (idx + 1) % n;
            let Some(message) = q.ready.pop_front() else {
                return;
            };

            self.next_delivery_tag += 1;
            let tag = self.next_delivery_tag;
            let delivery = MemoryDelivery {
                state: Weak::clone(&self.handle),
                consumer: consumer_id,
                tag,
                routing_key: message.routing_key.clone(),
                content_type: message.content_type.clone(),
                payload: message.payload.clone(),
                redelivered: message.redelivered,
            };
            let Some(consumer) = self.consumers.get_mut(&consumer_id) else {
                return;
            };
            consumer.unacked.insert(tag, message);
            if consumer.sender.send(delivery).is_err() {
                // Receiver dropped: the consumer is gone.
                self.cancel_consumer(consumer_id);
            }
        }
    }

    /// Removes a consumer, requeues its unacknowledged messages in delivery
    /// order, and deletes an auto-delete queue left without consumers.
    fn cancel_consumer(&mut self, consumer_id: u64) {
        let Some(consumer) = self.consumers.remove(&consumer_id) else {
            return;
        };

        if let Some(channel) = self.channels.get_mut(&consumer.channel) {
            channel.consumers.retain(|&id| id != consumer_id);
        }

        let queue_name = consumer.queue;
        let Some(q) = self.queues.get_mut(&queue_name) else {
            return;
        };
        q.consumers.retain(|&id| id != consumer_id);
        if q.next_consumer >= q.consumers.len() {
            q.next_consumer = 0;
        }

        let mut pending: Vec<(u64, StoredMessage)> = consumer.unacked.into_iter().collect();
        pending.sort_by_key(|(tag, _)| *tag);
        for (_, mut message) in pending.into_iter().rev() {
            message.redelivered = true;
            q.ready.push_front(message);
        }

        if q.options.auto_delete && q.consumers.is_empty() {
            tracing::debug!(queue = %queue_name, "auto-delete queue lost its last consumer");
            self.delete_queue(&queue_name);
        } else {
            self.dispatch(&queue_name);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        let Some(q) = self.queues.remove(name) else {
            return;
        };
        for consumer_id in q.consumers {
            if let Some(consumer) = self.consumers.remove(&consumer_id) {
                if let Some(channel) = self.channels.get_mut(&consumer.channel) {
                    channel.consumers.retain(|&id| id != consumer_id);
                }
            }
        }
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|(queue, _)| queue != name);
        }
        tracing::debug!(queue = name, "queue deleted");
    }

    fn close_channel(&mut self, channel_id: u64) {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return;
        };
        if let Some(channels) = self.connections.get_mut(&channel.connection) {
            channels.retain(|&id| id != channel_id);
        }
        for consumer_id in channel.consumers {
            self.cancel_consumer(consumer_id);
        }
    }

    fn close_connection(&mut self, connection: ConnectionId) {
        let Some(channels) = self.connections.remove(&connection) else {
            return;
        };
        for channel_id in channels {
            self.close_channel(channel_id);
        }
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection))
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            self.delete_queue(&name);
        }
        tracing::debug!(%connection, "connection closed");
    }

    /// Removes a delivery from its consumer's unacknowledged set.
    ///
    /// Fails with `ChannelClosed` when the consumer was cancelled in the
    /// meantime; its unacknowledged messages have already been requeued.
    fn settle(&mut self, consumer_id: u64, tag: u64) -> Result<(String, StoredMessage), BrokerError> {
        let consumer = self
            .consumers
            .get_mut(&consumer_id)
            .ok_or(BrokerError::ChannelClosed)?;
        let message = consumer
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::ChannelClosed)?;
        Ok((consumer.queue.clone(), message))
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// An in-process broker. Cheap to clone; clones share the same state.
///
/// ```rust
/// use peril_broker::{Channel, Connection, ExchangeKind, MemoryBroker};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = MemoryBroker::new();
/// let conn = broker.connect().await;
/// let ch = conn.create_channel().await.unwrap();
/// ch.declare_exchange("peril_topic", ExchangeKind::Topic, true).await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty broker with no exchanges or queues.
    pub fn new() -> Self {
        let shared = Arc::new_cyclic(|handle| {
            Mutex::new(BrokerState {
                handle: Weak::clone(handle),
                ..BrokerState::default()
            })
        });
        Self { shared }
    }

    /// Opens a new connection.
    pub async fn connect(&self) -> MemoryConnection {
        let id = ConnectionId::new(next_id());
        self.shared.lock().await.connections.insert(id, Vec::new());
        tracing::debug!(%id, "memory broker connection opened");
        MemoryConnection {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether a queue with this name currently exists.
    pub async fn queue_exists(&self, name: &str) -> bool {
        self.shared.lock().await.queues.contains_key(name)
    }

    /// Ready (undelivered) messages in a queue, or `None` if it doesn't exist.
    pub async fn queue_depth(&self, name: &str) -> Option<usize> {
        self.shared
            .lock()
            .await
            .queues
            .get(name)
            .map(|q| q.ready.len())
    }

    /// Deliveries from `name` that consumers hold without having settled them.
    pub async fn unacked_count(&self, name: &str) -> usize {
        self.shared
            .lock()
            .await
            .consumers
            .values()
            .filter(|c| c.queue == name)
            .map(|c| c.unacked.len())
            .sum()
    }

    /// Active consumers on a queue.
    pub async fn consumer_count(&self, name: &str) -> usize {
        self.shared
            .lock()
            .await
            .queues
            .get(name)
            .map_or(0, |q| q.consumers.len())
    }

    /// Simulates a broker restart.
    ///
    /// Every connection is dropped (unacknowledged deliveries are requeued),
    /// then non-durable queues and exchanges are discarded. Durable queues
    /// keep their ready messages and bindings to durable exchanges.
    pub async fn restart(&self) {
        let mut state = self.shared.lock().await;
        let connections: Vec<ConnectionId> = state.connections.keys().copied().collect();
        for connection in connections {
            state.close_connection(connection);
        }
        let transient: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| !q.options.durable)
            .map(|(name, _)| name.clone())
            .collect();
        for name in transient {
            state.delete_queue(&name);
        }
        state.exchanges.retain(|_, ex| ex.durable);
        tracing::info!("memory broker restarted");
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    shared: Arc<Mutex<BrokerState>>,
}

impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn create_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.shared.lock().await;
        let channels = state
            .connections
            .get_mut(&self.id)
            .ok_or(BrokerError::ConnectionClosed)?;
        let id = next_id();
        channels.push(id);
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                prefetch: 0,
                consumers: Vec::new(),
            },
        );
        Ok(MemoryChannel {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().await.close_connection(self.id);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A channel on a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryChannel {
    id: u64,
    shared: Arc<Mutex<BrokerState>>,
}

impl Channel for MemoryChannel {
    type Consumer = MemoryConsumer;

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        state.channel(self.id)?;
        if name.is_empty() {
            return Err(BrokerError::AccessRefused(
                "the default exchange cannot be redeclared".into(),
            ));
        }
        match state.exchanges.get(name) {
            Some(ex) if ex.kind != kind || ex.durable != durable => {
                Err(BrokerError::PreconditionFailed(format!(
                    "exchange '{name}' already declared as {} (durable: {})",
                    ex.kind, ex.durable
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    ExchangeState {
                        kind,
                        durable,
                        bindings: Vec::new(),
                    },
                );
                tracing::debug!(exchange = name, %kind, durable, "exchange declared");
                Ok(())
            }
        }
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        let mut state = self.shared.lock().await;
        let connection = state.channel(self.id)?.connection;
        let name = if name.is_empty() {
            generated_queue_name()
        } else {
            name.to_string()
        };

        if let Some(q) = state.queues.get(&name) {
            if q.locked_for(connection) {
                return Err(BrokerError::ResourceLocked(format!(
                    "queue '{name}' is exclusive to another connection"
                )));
            }
            if q.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{name}' already declared with different parameters"
                )));
            }
            return Ok(q.info(&name));
        }

        let owner = options.exclusive.then_some(connection);
        let q = QueueState {
            options,
            owner,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        };
        let info = q.info(&name);
        tracing::debug!(queue = %name, durable = q.options.durable, "queue declared");
        state.queues.insert(name, q);
        Ok(info)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        let connection = state.channel(self.id)?.connection;
        if exchange.is_empty() {
            return Err(BrokerError::AccessRefused(
                "queues cannot be bound to the default exchange".into(),
            ));
        }
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        if q.locked_for(connection) {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }
        let ex = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !ex.bindings.contains(&binding) {
            ex.bindings.push(binding);
        }
        tracing::debug!(queue, exchange, routing_key, "queue bound");
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        let channel = state
            .channels
            .get_mut(&self.id)
            .ok_or(BrokerError::ChannelClosed)?;
        channel.prefetch = count;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock().await;
        state.channel(self.id)?;
        let content_type = Some(message.content_type).filter(|ct| !ct.is_empty());
        state.enqueue(
            exchange,
            StoredMessage {
                routing_key: routing_key.to_string(),
                content_type,
                payload: message.payload,
                redelivered: false,
            },
        )
    }

    async fn consume(&self, queue: &str) -> Result<MemoryConsumer, BrokerError> {
        let mut state = self.shared.lock().await;
        let channel = state.channel(self.id)?;
        let (connection, prefetch) = (channel.connection, channel.prefetch);

        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        if q.locked_for(connection) {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }

        let id = next_id();
        q.consumers.push(id);
        let (sender, receiver) = mpsc::unbounded_channel();
        state.consumers.insert(
            id,
            ConsumerState {
                queue: queue.to_string(),
                channel: self.id,
                prefetch,
                unacked: HashMap::new(),
                sender,
            },
        );
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.consumers.push(id);
        }
        tracing::debug!(queue, consumer = id, prefetch, "consumer started");
        state.dispatch(queue);
        Ok(MemoryConsumer { receiver })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.shared.lock().await.close_channel(self.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer / Delivery
// ---------------------------------------------------------------------------

/// Delivery stream of one consumer on a [`MemoryChannel`].
#[derive(Debug)]
pub struct MemoryConsumer {
    receiver: mpsc::UnboundedReceiver<MemoryDelivery>,
}

impl Consumer for MemoryConsumer {
    type Delivery = MemoryDelivery;

    async fn next(&mut self) -> Option<Result<MemoryDelivery, BrokerError>> {
        self.receiver.recv().await.map(Ok)
    }
}

/// A message delivered by a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryDelivery {
    state: Weak<Mutex<BrokerState>>,
    consumer: u64,
    tag: u64,
    routing_key: String,
    content_type: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

impl Delivery for MemoryDelivery {
    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(self) -> Result<(), BrokerError> {
        let shared = self.state.upgrade().ok_or(BrokerError::ConnectionClosed)?;
        let mut state = shared.lock().await;
        let (queue, _) = state.settle(self.consumer, self.tag)?;
        state.dispatch(&queue);
        Ok(())
    }

    async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        let shared = self.state.upgrade().ok_or(BrokerError::ConnectionClosed)?;
        let mut state = shared.lock().await;
        let (queue, mut message) = state.settle(self.consumer, self.tag)?;

        if requeue {
            message.redelivered = true;
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_front(message);
            }
        } else {
            let dead_letter_exchange = state
                .queues
                .get(&queue)
                .and_then(|q| q.options.dead_letter_exchange.clone());
            match dead_letter_exchange {
                Some(dlx) => {
                    message.redelivered = false;
                    if let Err(e) = state.enqueue(&dlx, message) {
                        tracing::warn!(queue = %queue, dlx = %dlx, error = %e, "dead-lettering failed, message dropped");
                    }
                }
                None => {
                    tracing::trace!(queue = %queue, "rejected message dropped");
                }
            }
        }

        state.dispatch(&queue);
        Ok(())
    }
}
