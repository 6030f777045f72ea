//! Reliable publish/subscribe on top of a message broker.
//!
//! The messaging core that sits between game handlers and the broker:
//!
//! - [`declare_and_bind`]: set up a queue and its binding on a fresh channel
//! - [`publish`] / [`Publisher`]: encode a value and send it, tagged
//! - [`subscribe`]: one task per queue that decodes deliveries, runs a
//!   [`Handler`], and settles every delivery exactly once
//! - [`AckType`]: the decision a handler returns
//! - [`PubSubConfig`]: dead-lettering and prefetch settings
//!
//! ```text
//! Publisher → broker → delivery loop → Codec → Handler → AckType → broker
//! ```
//!
//! # At-least-once delivery
//!
//! A message leaves its queue only when the handler returns
//! [`AckType::Ack`]. Until then the broker keeps it as *unacknowledged*:
//! if the subscriber's channel closes, crashes or is cancelled first, the
//! message goes back to the queue and is delivered again. Handlers must
//! therefore tolerate seeing the same message twice.
//!
//! # Example
//!
//! Wiring a subscriber and a publisher through the in-memory broker:
//!
//! ```rust
//! use peril_broker::{Connection, MemoryBroker};
//! use peril_protocol::PlayingState;
//! use peril_protocol::routing::{EXCHANGE_PERIL_DIRECT, PAUSE_KEY};
//! use peril_pubsub::{
//!     AckType, PubSubConfig, Publisher, QueueDurability, declare_exchanges, subscribe_json,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MemoryBroker::new();
//! let conn = broker.connect().await;
//! declare_exchanges(&conn).await?;
//!
//! // The handler runs on the subscription's own task.
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let sub = subscribe_json::<_, PlayingState, _>(
//!     &conn,
//!     EXCHANGE_PERIL_DIRECT,
//!     "pause.alice",
//!     PAUSE_KEY,
//!     QueueDurability::Transient,
//!     &PubSubConfig::default(),
//!     move |state: PlayingState| {
//!         let tx = tx.clone();
//!         async move {
//!             let _ = tx.send(state.is_paused);
//!             AckType::Ack
//!         }
//!     },
//! )
//! .await?;
//!
//! let publisher = Publisher::new(conn.create_channel().await?);
//! publisher
//!     .publish_json(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused: true })
//!     .await?;
//!
//! assert_eq!(rx.recv().await, Some(true));
//! let stats = sub.close().await?;
//! assert_eq!(stats.acked, 1);
//! # Ok(())
//! # }
//! ```

mod ack;
mod config;
mod error;
mod publish;
mod subscribe;
mod topology;

pub use ack::{AckType, BrokerAction, DeliveryState};
pub use config::PubSubConfig;
pub use error::PubSubError;
pub use publish::{Publisher, publish, publish_binary, publish_json};
pub use subscribe::{
    Handler, SubscribeOptions, Subscription, SubscriptionStats, subscribe, subscribe_binary,
    subscribe_json,
};
pub use topology::{QueueDurability, declare_and_bind, declare_exchanges};
