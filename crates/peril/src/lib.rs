//! # Peril
//!
//! At-least-once messaging for the Peril multiplayer strategy game.
//!
//! Players and the server exchange game events through an AMQP-style
//! broker. This crate ties the layers together:
//!
//! - [`broker`]: connection/channel traits, an in-memory broker and an
//!   AMQP backend
//! - [`protocol`]: payload types, codecs and routing keys
//! - [`pubsub`]: declaration, publishing and the delivery loop
//! - [`handlers`] / [`subscriptions`]: game events mapped to
//!   acknowledgment decisions through the [`GameLogic`] seam
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peril::prelude::*;
//!
//! # async fn run() -> Result<(), PerilError> {
//! let config = PerilConfig::load()?;
//! peril::telemetry::init_tracing(&config.log_filter);
//!
//! let broker = MemoryBroker::new();
//! let conn = broker.connect().await;
//! declare_exchanges(&conn).await?;
//!
//! let sink = std::sync::Arc::new(MemoryLogSink::new());
//! let logs = subscribe_game_logs(&conn, sink, &config.pubsub).await?;
//! // ... players subscribe with `subscribe_player` and publish moves ...
//! logs.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod game;
pub mod handlers;
pub mod outbound;
pub mod subscriptions;
pub mod telemetry;

pub use config::PerilConfig;
pub use error::PerilError;
pub use game::{GameLogic, MoveOutcome, WarOutcome, WarResolution};
pub use handlers::{
    LogSink, MemoryLogSink, handler_game_log, handler_move, handler_pause, handler_war,
};
pub use outbound::{publish_game_log, publish_log_burst, publish_move, publish_pause};
pub use subscriptions::{PlayerSubscriptions, subscribe_game_logs, subscribe_player};

/// Re-export of the broker crate.
pub use peril_broker as broker;
/// Re-export of the protocol crate.
pub use peril_protocol as protocol;
/// Re-export of the messaging core.
pub use peril_pubsub as pubsub;

/// Dials the AMQP broker named by `config.amqp_url`.
#[cfg(feature = "amqp")]
pub async fn connect(config: &PerilConfig) -> Result<broker::AmqpConnection, PerilError> {
    Ok(broker::AmqpConnection::connect(&config.amqp_url).await?)
}

/// Convenience re-exports for the common case.
pub mod prelude {
    #[cfg(feature = "memory")]
    pub use peril_broker::{MemoryBroker, MemoryConnection};
    pub use peril_broker::{Channel, Connection};
    pub use peril_protocol::{
        ArmyMove, GameLog, Location, Player, PlayingState, RecognitionOfWar, Unit, UnitRank,
    };
    pub use peril_pubsub::{
        AckType, PubSubConfig, Publisher, QueueDurability, Subscription, declare_exchanges,
    };

    pub use crate::{
        GameLogic, LogSink, MemoryLogSink, MoveOutcome, PerilConfig, PerilError,
        PlayerSubscriptions, WarOutcome, WarResolution, publish_game_log, publish_move,
        publish_pause, subscribe_game_logs, subscribe_player,
    };
}
