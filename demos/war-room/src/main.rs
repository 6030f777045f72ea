use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use peril::prelude::*;
use tracing::info;

// ---------------------------------------------------------------------------
// Game logic
// ---------------------------------------------------------------------------

/// One player's view of the board.
struct Board {
    username: String,
    player: Mutex<Player>,
    paused: AtomicBool,
}

impl Board {
    fn new(player: Player) -> Arc<Self> {
        Arc::new(Self {
            username: player.username.clone(),
            player: Mutex::new(player),
            paused: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, Player> {
        match self.player.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Moves every unit to `to` and returns the move to broadcast.
    fn command_move(&self, to: Location) -> ArmyMove {
        let mut player = self.state();
        for unit in player.units.values_mut() {
            unit.location = to;
        }
        ArmyMove {
            units: player.units.values().cloned().collect(),
            player: player.clone(),
            to_location: to,
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

fn power<'a>(units: impl Iterator<Item = &'a Unit>) -> u32 {
    units
        .map(|unit| match unit.rank {
            UnitRank::Infantry => 1,
            UnitRank::Cavalry => 5,
            UnitRank::Artillery => 10,
        })
        .sum()
}

impl GameLogic for Board {
    fn username(&self) -> &str {
        &self.username
    }

    fn player(&self) -> Player {
        self.state().clone()
    }

    fn handle_pause(&self, state: &PlayingState) {
        self.paused.store(state.is_paused, Ordering::SeqCst);
    }

    fn handle_move(&self, mv: &ArmyMove) -> MoveOutcome {
        if mv.player.username == self.username {
            return MoveOutcome::SamePlayer;
        }
        if self.state().units_at(mv.to_location).next().is_some() {
            MoveOutcome::MakeWar
        } else {
            MoveOutcome::Safe
        }
    }

    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution {
        let attacker = &war.attacker;
        let defender = &war.defender;
        let local_is_attacker = attacker.username == self.username;
        if !local_is_attacker && defender.username != self.username {
            return WarResolution::without_battle(WarOutcome::NotInvolved);
        }

        let Some(location) = attacker.units.values().map(|u| u.location).next() else {
            return WarResolution::without_battle(WarOutcome::NoUnits);
        };

        let mut local = self.state();
        if local.units_at(location).next().is_none() {
            return WarResolution::without_battle(WarOutcome::NoUnits);
        }

        let attack = power(attacker.units_at(location));
        let defence = power(defender.units_at(location));
        let (winner, loser) = if attack > defence {
            (attacker, defender)
        } else {
            (defender, attacker)
        };

        let outcome = if attack == defence {
            WarOutcome::Draw
        } else if winner.username == self.username {
            WarOutcome::YouWon
        } else {
            local.units.retain(|_, unit| unit.location != location);
            WarOutcome::OpponentWon
        };

        WarResolution {
            outcome,
            winner: winner.username.clone(),
            loser: loser.username.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

fn unit(id: u32, rank: UnitRank, location: Location) -> Unit {
    Unit { id, rank, location }
}

/// Alice marches two cavalry into Asia, where Bob holds an infantry and an
/// artillery unit. Returns the game logs the server collected.
async fn run_war(
    broker: &MemoryBroker,
    config: &PerilConfig,
) -> Result<Vec<GameLog>, PerilError> {
    let server = broker.connect().await;
    declare_exchanges(&server).await?;

    let sink = Arc::new(MemoryLogSink::new());
    let log_sub = subscribe_game_logs(&server, Arc::clone(&sink), &config.pubsub).await?;
    let server_pub = Publisher::new(server.create_channel().await?);

    let alice = Board::new(
        Player::new("alice")
            .with_unit(unit(1, UnitRank::Cavalry, Location::Europe))
            .with_unit(unit(2, UnitRank::Cavalry, Location::Europe)),
    );
    let bob = Board::new(
        Player::new("bob")
            .with_unit(unit(1, UnitRank::Infantry, Location::Asia))
            .with_unit(unit(2, UnitRank::Artillery, Location::Asia)),
    );

    let alice_conn = broker.connect().await;
    let alice_pub = Publisher::new(alice_conn.create_channel().await?);
    let alice_subs = subscribe_player(
        &alice_conn,
        Arc::clone(&alice),
        alice_pub.clone(),
        &config.pubsub,
    )
    .await?;

    let bob_conn = broker.connect().await;
    let bob_pub = Publisher::new(bob_conn.create_channel().await?);
    let bob_subs = subscribe_player(&bob_conn, Arc::clone(&bob), bob_pub, &config.pubsub).await?;

    let mv = alice.command_move(Location::Asia);
    info!(units = mv.units.len(), to = %mv.to_location, "alice moves");
    publish_move(&alice_pub, &mv).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while sink.logs().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    publish_pause(&server_pub, true).await?;
    while !(alice.is_paused() && bob.is_paused()) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    info!(alice = alice.is_paused(), bob = bob.is_paused(), "pause broadcast");

    alice_subs.close().await?;
    bob_subs.close().await?;
    let stats = log_sub.close().await?;
    info!(acked = stats.acked, "log collector stopped");

    alice_conn.close().await?;
    bob_conn.close().await?;
    server.close().await?;
    Ok(sink.logs())
}

#[tokio::main]
async fn main() -> Result<(), PerilError> {
    let config = PerilConfig::load()?;
    peril::telemetry::init_tracing(&config.log_filter);

    let broker = MemoryBroker::new();
    let logs = run_war(&broker, &config).await?;

    for log in &logs {
        println!("[{}] {}", log.username, log.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(username: &str, rank: UnitRank, location: Location) -> Arc<Board> {
        Board::new(Player::new(username).with_unit(unit(1, rank, location)))
    }

    fn war(attacker: &Board, defender: &Board) -> RecognitionOfWar {
        RecognitionOfWar {
            attacker: attacker.player(),
            defender: defender.player(),
        }
    }

    #[test]
    fn test_move_outcomes() {
        let bob = board("bob", UnitRank::Infantry, Location::Asia);
        let alice = board("alice", UnitRank::Cavalry, Location::Europe);

        let safe = alice.command_move(Location::Africa);
        assert_eq!(bob.handle_move(&safe), MoveOutcome::Safe);

        let hostile = alice.command_move(Location::Asia);
        assert_eq!(bob.handle_move(&hostile), MoveOutcome::MakeWar);
        assert_eq!(alice.handle_move(&hostile), MoveOutcome::SamePlayer);
    }

    #[test]
    fn test_war_outcomes() {
        let alice = board("alice", UnitRank::Cavalry, Location::Asia);
        let bob = board("bob", UnitRank::Artillery, Location::Asia);
        let carol = Board::new(Player::new("carol"));

        let declared = war(&alice, &bob);
        assert_eq!(carol.handle_war(&declared).outcome, WarOutcome::NotInvolved);
        assert_eq!(bob.handle_war(&declared).outcome, WarOutcome::YouWon);

        let lost = alice.handle_war(&declared);
        assert_eq!(lost.outcome, WarOutcome::OpponentWon);
        assert_eq!(lost.winner, "bob");
        assert_eq!(alice.player().units.len(), 0);

        assert_eq!(alice.handle_war(&declared).outcome, WarOutcome::NoUnits);
    }

    #[test]
    fn test_equal_power_is_a_draw() {
        let alice = board("alice", UnitRank::Cavalry, Location::Asia);
        let bob = board("bob", UnitRank::Cavalry, Location::Asia);

        let resolution = bob.handle_war(&war(&alice, &bob));

        assert_eq!(resolution.outcome, WarOutcome::Draw);
        assert_eq!(
            resolution.log_message().as_deref(),
            Some("A war between bob and alice resulted in a draw")
        );
    }

    #[tokio::test]
    async fn test_war_scenario_logs_bobs_victory() {
        let broker = MemoryBroker::new();
        let logs = run_war(&broker, &PerilConfig::default()).await.unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].username, "alice");
        assert_eq!(logs[0].message, "bob won a war against alice");
    }
}
