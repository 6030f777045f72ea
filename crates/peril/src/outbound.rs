//! Messages a game process sends on its own initiative.

use peril_broker::Channel;
use peril_protocol::routing::{
    self, ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY,
};
use peril_protocol::{ArmyMove, GameLog, PlayingState};
use peril_pubsub::{PubSubError, Publisher};
use tracing::debug;

/// Broadcasts a pause (`true`) or resume (`false`) to every player.
pub async fn publish_pause<Ch: Channel>(
    publisher: &Publisher<Ch>,
    is_paused: bool,
) -> Result<(), PubSubError> {
    publisher
        .publish_json(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused })
        .await
}

/// Publishes a move under `army_moves.<mover>`.
pub async fn publish_move<Ch: Channel>(
    publisher: &Publisher<Ch>,
    mv: &ArmyMove,
) -> Result<(), PubSubError> {
    let key = routing::routing_key(ARMY_MOVES_PREFIX, &mv.player.username);
    publisher.publish_json(EXCHANGE_PERIL_TOPIC, &key, mv).await
}

/// Publishes a binary game log under `game_logs.<username>`, stamped now.
pub async fn publish_game_log<Ch: Channel>(
    publisher: &Publisher<Ch>,
    username: &str,
    message: impl Into<String>,
) -> Result<(), PubSubError> {
    let log = GameLog::now(username, message);
    let key = routing::routing_key(GAME_LOG_SLUG, username);
    publisher.publish_binary(EXCHANGE_PERIL_TOPIC, &key, &log).await
}

/// Publishes each message as its own game log. Stops at the first failure
/// and returns how many were sent before it.
pub async fn publish_log_burst<Ch, I>(
    publisher: &Publisher<Ch>,
    username: &str,
    messages: I,
) -> Result<usize, (usize, PubSubError)>
where
    Ch: Channel,
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut sent = 0;
    for message in messages {
        if let Err(e) = publish_game_log(publisher, username, message).await {
            return Err((sent, e));
        }
        sent += 1;
    }
    debug!(username, sent, "log burst published");
    Ok(sent)
}
