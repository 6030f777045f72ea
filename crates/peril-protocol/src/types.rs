//! Domain payloads exchanged between Peril clients and the server.
//!
//! Field names are PascalCase on the wire, which keeps JSON payloads
//! readable by every client that already speaks the game's format.
//! Enum values (`Location`, `UnitRank`) travel as lowercase strings.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// A continent units can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Americas,
    Europe,
    Africa,
    Asia,
    Antarctica,
    Australia,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Americas => "americas",
            Self::Europe => "europe",
            Self::Africa => "africa",
            Self::Asia => "asia",
            Self::Antarctica => "antarctica",
            Self::Australia => "australia",
        };
        f.write_str(name)
    }
}

/// The kind of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

impl fmt::Display for UnitRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Infantry => "infantry",
            Self::Cavalry => "cavalry",
            Self::Artillery => "artillery",
        };
        f.write_str(name)
    }
}

/// One unit on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Unit {
    #[serde(rename = "ID")]
    pub id: u32,
    pub rank: UnitRank,
    pub location: Location,
}

// ---------------------------------------------------------------------------
// Players
// ---------------------------------------------------------------------------

/// A player and the units they own, keyed by unit ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    pub username: String,
    #[serde(default)]
    pub units: BTreeMap<u32, Unit>,
}

impl Player {
    /// Creates a player with no units.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            units: BTreeMap::new(),
        }
    }

    /// Adds a unit, replacing any unit with the same ID.
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.units.insert(unit.id, unit);
        self
    }

    /// Units currently stationed at `location`.
    pub fn units_at(&self, location: Location) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.location == location)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Server broadcast that pauses or resumes the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

/// A player moved some of their units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: Location,
}

/// Two players' units met on the same continent.
///
/// Published by the defender after it sees an [`ArmyMove`] that lands on
/// its units; consumed by whichever player client picks it up from the
/// shared war queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

/// A line for the server's game log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameLog {
    pub current_time: SystemTime,
    pub message: String,
    pub username: String,
}

impl GameLog {
    /// Creates a log entry stamped with the current time.
    pub fn now(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: SystemTime::now(),
            message: message.into(),
            username: username.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_with_unit_keys_by_id() {
        let player = Player::new("alice")
            .with_unit(Unit {
                id: 3,
                rank: UnitRank::Cavalry,
                location: Location::Africa,
            })
            .with_unit(Unit {
                id: 3,
                rank: UnitRank::Artillery,
                location: Location::Asia,
            });
        assert_eq!(player.units.len(), 1);
        assert_eq!(player.units[&3].rank, UnitRank::Artillery);
    }

    #[test]
    fn test_units_at_filters_by_location() {
        let player = Player::new("bob")
            .with_unit(Unit {
                id: 1,
                rank: UnitRank::Infantry,
                location: Location::Europe,
            })
            .with_unit(Unit {
                id: 2,
                rank: UnitRank::Infantry,
                location: Location::Asia,
            });
        let ids: Vec<u32> = player.units_at(Location::Europe).map(|u| u.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_location_and_rank_display_match_wire_names() {
        assert_eq!(Location::Antarctica.to_string(), "antarctica");
        assert_eq!(UnitRank::Cavalry.to_string(), "cavalry");
    }

    #[test]
    fn test_playing_state_defaults_to_running() {
        assert!(!PlayingState::default().is_paused);
    }
}
