//! Handlers that turn game events into acknowledgment decisions.
//!
//! Each constructor returns a [`Handler`] for one subscription. Shared state
//! (the game, the publisher) is cloned into every invocation, so a handler
//! never holds a borrow across its own `await`.

use std::io;
use std::sync::{Arc, Mutex};

use peril_broker::Channel;
use peril_protocol::routing::{self, EXCHANGE_PERIL_TOPIC, WAR_RECOGNITIONS_PREFIX};
use peril_protocol::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};
use peril_pubsub::{AckType, Handler, Publisher};
use tracing::{debug, info, warn};

use crate::game::{GameLogic, MoveOutcome, WarOutcome};
use crate::outbound::publish_game_log;

/// Applies pause/resume broadcasts. Always acknowledges.
pub fn handler_pause<G: GameLogic>(logic: Arc<G>) -> impl Handler<PlayingState> {
    move |state: PlayingState| {
        let logic = Arc::clone(&logic);
        async move {
            logic.handle_pause(&state);
            debug!(paused = state.is_paused, "pause state applied");
            AckType::Ack
        }
    }
}

/// Applies other players' moves.
///
/// A move onto local units declares war by publishing a
/// [`RecognitionOfWar`] under `war.<local username>`; the move is only
/// acknowledged once that publish went through.
pub fn handler_move<G, Ch>(logic: Arc<G>, publisher: Publisher<Ch>) -> impl Handler<ArmyMove>
where
    G: GameLogic,
    Ch: Channel,
{
    move |mv: ArmyMove| {
        let logic = Arc::clone(&logic);
        let publisher = publisher.clone();
        async move {
            match logic.handle_move(&mv) {
                MoveOutcome::Safe => AckType::Ack,
                MoveOutcome::SamePlayer => AckType::NackDiscard,
                MoveOutcome::MakeWar => {
                    let war = RecognitionOfWar {
                        attacker: mv.player,
                        defender: logic.player(),
                    };
                    let key = routing::routing_key(WAR_RECOGNITIONS_PREFIX, logic.username());
                    match publisher.publish_json(EXCHANGE_PERIL_TOPIC, &key, &war).await {
                        Ok(()) => {
                            info!(
                                attacker = %war.attacker.username,
                                defender = %war.defender.username,
                                "war declared"
                            );
                            AckType::Ack
                        }
                        Err(e) => {
                            warn!(error = %e, routing_key = %key, "failed to declare war");
                            AckType::NackRequeue
                        }
                    }
                }
            }
        }
    }
}

/// Fights wars and reports the result as a game log.
///
/// A war this player is not part of goes back to the shared queue for
/// another player. A fought war is acknowledged only after its log was
/// published under `game_logs.<attacker>`.
pub fn handler_war<G, Ch>(logic: Arc<G>, publisher: Publisher<Ch>) -> impl Handler<RecognitionOfWar>
where
    G: GameLogic,
    Ch: Channel,
{
    move |war: RecognitionOfWar| {
        let logic = Arc::clone(&logic);
        let publisher = publisher.clone();
        async move {
            let resolution = logic.handle_war(&war);
            debug!(outcome = %resolution.outcome, "war resolved");

            let message = match (resolution.outcome, resolution.log_message()) {
                (WarOutcome::NotInvolved, _) => return AckType::NackRequeue,
                (WarOutcome::NoUnits, _) => return AckType::NackDiscard,
                (_, Some(message)) => message,
                (_, None) => return AckType::NackDiscard,
            };

            let attacker = &war.attacker.username;
            match publish_game_log(&publisher, attacker, message).await {
                Ok(()) => AckType::Ack,
                Err(e) => {
                    warn!(error = %e, attacker = %attacker, "failed to publish war log");
                    AckType::NackRequeue
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Game logs
// ---------------------------------------------------------------------------

/// Destination for collected game logs.
pub trait LogSink: Send + Sync + 'static {
    fn write(&self, log: &GameLog) -> io::Result<()>;
}

/// Keeps every log in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    logs: Mutex<Vec<GameLog>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of the logs written so far.
    pub fn logs(&self) -> Vec<GameLog> {
        match self.logs.lock() {
            Ok(logs) => logs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, log: &GameLog) -> io::Result<()> {
        self.logs
            .lock()
            .map_err(|_| io::Error::other("log sink poisoned"))?
            .push(log.clone());
        Ok(())
    }
}

/// Writes each log to `sink`; a failed write is requeued.
pub fn handler_game_log<S: LogSink>(sink: Arc<S>) -> impl Handler<GameLog> {
    move |log: GameLog| {
        let sink = Arc::clone(&sink);
        async move {
            match sink.write(&log) {
                Ok(()) => AckType::Ack,
                Err(e) => {
                    warn!(error = %e, username = %log.username, "failed to write game log");
                    AckType::NackRequeue
                }
            }
        }
    }
}
