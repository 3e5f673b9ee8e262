//! Faction definitions: starting conditions for a player.

use serde::{Deserialize, Serialize};

use crate::ledger::ResourceCost;

/// An entity placed at game start, offset from the player's start cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartingEntity {
    /// Template name.
    pub template: String,
    /// Cell offset from the start position.
    #[serde(default)]
    pub offset: (i32, i32),
}

/// Faction definition.
///
/// # Example RON
///
/// ```ron
/// FactionDefinition(
///     name: "magic",
///     starting_resources: { "gold": 1000, "wood": 500 },
///     starting_buildings: [StartingEntity(template: "mage_tower")],
///     starting_units: [
///         StartingEntity(template: "initiate", offset: (3, 0)),
///         StartingEntity(template: "initiate", offset: (3, 1)),
///     ],
///     ai_hints: ["rush"],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionDefinition {
    /// Unique faction name.
    pub name: String,

    /// Resources credited at game start, before the resource multiplier.
    #[serde(default)]
    pub starting_resources: ResourceCost,

    /// Units placed at game start.
    #[serde(default)]
    pub starting_units: Vec<StartingEntity>,

    /// Pre-built buildings placed at game start.
    #[serde(default)]
    pub starting_buildings: Vec<StartingEntity>,

    /// Opaque hints for AI players.
    #[serde(default)]
    pub ai_hints: Vec<String>,
}
