//! Players.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::math::CellCoord;
use crate::PlayerId;

/// Colors handed out by player slot.
const PLAYER_COLORS: [[u8; 3]; 8] = [
    [220, 40, 40],
    [40, 90, 220],
    [40, 180, 60],
    [230, 200, 40],
    [240, 240, 240],
    [40, 200, 200],
    [230, 120, 20],
    [220, 80, 200],
];

/// A participant in the game.
///
/// Resource balances live in [`crate::ledger::ResourceLedger`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Player {
    /// Player id.
    pub id: PlayerId,
    /// Faction name.
    pub faction: String,
    /// Whether an AI drives this player.
    pub is_ai: bool,
    /// Alliance; players on the same team never fight.
    pub team: u32,
    /// Display color.
    pub color: [u8; 3],
    /// Start cell.
    pub start_cell: CellCoord,
    /// Researched technologies.
    pub technologies: BTreeSet<String>,
}

impl Player {
    /// New player in slot `index` with its own team.
    #[must_use]
    pub fn new(id: PlayerId, faction: &str, is_ai: bool, index: usize, start_cell: CellCoord) -> Self {
        Self {
            id,
            faction: faction.to_string(),
            is_ai,
            team: id,
            color: PLAYER_COLORS[index % PLAYER_COLORS.len()],
            start_cell,
            technologies: BTreeSet::new(),
        }
    }

    /// Whether a technology is researched.
    #[must_use]
    pub fn has_tech(&self, tech: &str) -> bool {
        self.technologies.contains(tech)
    }

    /// Whether every listed technology is researched.
    #[must_use]
    pub fn has_all_techs(&self, techs: &[String]) -> bool {
        techs.iter().all(|t| self.has_tech(t))
    }
}
