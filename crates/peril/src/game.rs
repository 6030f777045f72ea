//! The seam between messaging and the game simulation.
//!
//! The simulation (board state, combat rules, the REPL) lives outside this
//! crate. Handlers only need to ask it what an incoming event means, and
//! [`GameLogic`] is that question.

use std::fmt;

use peril_protocol::{ArmyMove, Player, PlayingState, RecognitionOfWar};

/// What a remote army move means for the local player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move is the local player's own, echoed back.
    SamePlayer,
    /// No contact with local units.
    Safe,
    /// The move landed on local units; a war must be declared.
    MakeWar,
}

/// How a war played out from the local player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarOutcome {
    /// Neither side is the local player; someone else must resolve it.
    NotInvolved,
    /// The local side has no units left to fight with.
    NoUnits,
    YouWon,
    OpponentWon,
    Draw,
}

impl fmt::Display for WarOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotInvolved => "not involved",
            Self::NoUnits => "no units",
            Self::YouWon => "you won",
            Self::OpponentWon => "opponent won",
            Self::Draw => "draw",
        };
        f.write_str(name)
    }
}

/// Result of resolving a war.
///
/// For a draw, `winner` and `loser` are just the two sides in the order
/// the simulation reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    pub winner: String,
    pub loser: String,
}

impl WarResolution {
    /// A resolution where no fighting happened.
    pub fn without_battle(outcome: WarOutcome) -> Self {
        Self {
            outcome,
            winner: String::new(),
            loser: String::new(),
        }
    }

    /// The game-log line for a fought war, or `None` if nobody fought.
    pub fn log_message(&self) -> Option<String> {
        match self.outcome {
            WarOutcome::YouWon | WarOutcome::OpponentWon => Some(format!(
                "{} won a war against {}",
                self.winner, self.loser
            )),
            WarOutcome::Draw => Some(format!(
                "A war between {} and {} resulted in a draw",
                self.winner, self.loser
            )),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
        }
    }
}

/// Game rules as seen by the message handlers.
///
/// Implementations are shared between subscription tasks behind an `Arc`,
/// so methods take `&self` and any mutable state needs its own lock.
pub trait GameLogic: Send + Sync + 'static {
    /// The local player's name.
    fn username(&self) -> &str;

    /// Snapshot of the local player and their units.
    fn player(&self) -> Player;

    /// Applies a pause/resume broadcast.
    fn handle_pause(&self, state: &PlayingState);

    /// Applies another player's move to the local board.
    fn handle_move(&self, mv: &ArmyMove) -> MoveOutcome;

    /// Fights (or declines) a war.
    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution;
}
