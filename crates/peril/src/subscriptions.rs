//! Wiring of handlers to queues.

use std::sync::Arc;

use peril_broker::{Channel, Connection};
use peril_protocol::routing::{
    self, ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG,
    PAUSE_KEY, WAR_RECOGNITIONS_PREFIX,
};
use peril_protocol::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};
use peril_pubsub::{
    PubSubConfig, PubSubError, Publisher, QueueDurability, Subscription, SubscriptionStats,
    subscribe_binary, subscribe_json,
};
use tracing::info;

use crate::game::GameLogic;
use crate::handlers::{LogSink, handler_game_log, handler_move, handler_pause, handler_war};

/// Name of the shared queue every player's war handler consumes from.
pub const WAR_QUEUE: &str = WAR_RECOGNITIONS_PREFIX;

/// The three subscriptions a player process runs.
#[derive(Debug)]
pub struct PlayerSubscriptions {
    pub pause: Subscription,
    pub moves: Subscription,
    pub war: Subscription,
}

impl PlayerSubscriptions {
    /// Closes all three and returns their stats as `[pause, moves, war]`.
    ///
    /// Every subscription is closed even if an earlier one fails; the
    /// first error is returned.
    pub async fn close(self) -> Result<[SubscriptionStats; 3], PubSubError> {
        let pause = self.pause.close().await;
        let moves = self.moves.close().await;
        let war = self.war.close().await;
        Ok([pause?, moves?, war?])
    }
}

/// Starts the pause, move and war subscriptions for `logic`'s player.
///
/// | queue | exchange | key | durability |
/// |---|---|---|---|
/// | `pause.<user>` | `peril_direct` | `pause` | transient |
/// | `army_moves.<user>` | `peril_topic` | `army_moves.*` | transient |
/// | `war` | `peril_topic` | `war.*` | durable, shared |
///
/// Subscriptions already started are closed again if a later one fails.
pub async fn subscribe_player<C, G, Ch>(
    conn: &C,
    logic: Arc<G>,
    publisher: Publisher<Ch>,
    config: &PubSubConfig,
) -> Result<PlayerSubscriptions, PubSubError>
where
    C: Connection,
    G: GameLogic,
    Ch: Channel,
{
    let username = logic.username().to_string();

    let pause = subscribe_json::<_, PlayingState, _>(
        conn,
        EXCHANGE_PERIL_DIRECT,
        &routing::routing_key(PAUSE_KEY, &username),
        PAUSE_KEY,
        QueueDurability::Transient,
        config,
        handler_pause(Arc::clone(&logic)),
    )
    .await?;

    let moves = subscribe_json::<_, ArmyMove, _>(
        conn,
        EXCHANGE_PERIL_TOPIC,
        &routing::routing_key(ARMY_MOVES_PREFIX, &username),
        &routing::any_subject(ARMY_MOVES_PREFIX),
        QueueDurability::Transient,
        config,
        handler_move(Arc::clone(&logic), publisher.clone()),
    )
    .await;
    let moves = match moves {
        Ok(moves) => moves,
        Err(e) => {
            let _ = pause.close().await;
            return Err(e);
        }
    };

    let war = subscribe_json::<_, RecognitionOfWar, _>(
        conn,
        EXCHANGE_PERIL_TOPIC,
        WAR_QUEUE,
        &routing::any_subject(WAR_RECOGNITIONS_PREFIX),
        QueueDurability::Durable,
        config,
        handler_war(logic, publisher),
    )
    .await;
    let war = match war {
        Ok(war) => war,
        Err(e) => {
            let _ = pause.close().await;
            let _ = moves.close().await;
            return Err(e);
        }
    };

    info!(username = %username, "player subscriptions started");
    Ok(PlayerSubscriptions { pause, moves, war })
}

/// Collects every player's game logs into `sink`.
///
/// Consumes the durable `game_logs` queue bound with `game_logs.*`, decoding
/// binary payloads with the bounded binary prefetch from `config`.
pub async fn subscribe_game_logs<C, S>(
    conn: &C,
    sink: Arc<S>,
    config: &PubSubConfig,
) -> Result<Subscription, PubSubError>
where
    C: Connection,
    S: LogSink,
{
    subscribe_binary::<_, GameLog, _>(
        conn,
        EXCHANGE_PERIL_TOPIC,
        GAME_LOG_SLUG,
        &routing::any_subject(GAME_LOG_SLUG),
        QueueDurability::Durable,
        config,
        handler_game_log(sink),
    )
    .await
}
