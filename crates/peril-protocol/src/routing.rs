//! Exchange names, routing-key prefixes, and key builders.
//!
//! Routing keys are dot-separated words: `<prefix>.<subject>`, where the
//! subject is usually a username. Topic bindings use `<prefix>.*` to catch
//! every subject under a prefix.

/// Direct exchange carrying server broadcasts (pause/resume).
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";

/// Topic exchange carrying moves, war recognitions and game logs.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";

/// Fanout exchange receiving rejected (non-requeued) messages.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";

/// Durable queue bound to [`EXCHANGE_PERIL_DLX`].
pub const QUEUE_PERIL_DLQ: &str = "peril_dlq";

/// Routing key for [`PlayingState`](crate::PlayingState) broadcasts.
pub const PAUSE_KEY: &str = "pause";

/// Prefix for [`ArmyMove`](crate::ArmyMove) keys.
pub const ARMY_MOVES_PREFIX: &str = "army_moves";

/// Prefix for [`RecognitionOfWar`](crate::RecognitionOfWar) keys.
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";

/// Prefix for [`GameLog`](crate::GameLog) keys. Also the log queue's name.
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Builds `<prefix>.<subject>`.
///
/// ```rust
/// use peril_protocol::routing::{routing_key, ARMY_MOVES_PREFIX};
///
/// assert_eq!(routing_key(ARMY_MOVES_PREFIX, "alice"), "army_moves.alice");
/// ```
pub fn routing_key(prefix: &str, subject: &str) -> String {
    format!("{prefix}.{subject}")
}

/// Builds the topic binding `<prefix>.*`.
pub fn any_subject(prefix: &str) -> String {
    format!("{prefix}.*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_bindings() {
        assert_eq!(routing_key(WAR_RECOGNITIONS_PREFIX, "bob"), "war.bob");
        assert_eq!(routing_key(GAME_LOG_SLUG, "bob"), "game_logs.bob");
        assert_eq!(any_subject(ARMY_MOVES_PREFIX), "army_moves.*");
        assert_eq!(any_subject(GAME_LOG_SLUG), "game_logs.*");
    }
}
