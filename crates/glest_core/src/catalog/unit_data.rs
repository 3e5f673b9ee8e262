//! Unit template definitions.

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::ledger::ResourceCost;
use crate::math::{decimal_serde, Fixed};

/// Movement medium a unit may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    /// Walks on land.
    Land,
    /// Flies over anything.
    Air,
    /// Sails on water.
    Water,
}

impl Field {
    /// Occupancy layer used by units moving in this field.
    #[must_use]
    pub const fn layer(self) -> Layer {
        match self {
            Self::Air => Layer::Air,
            Self::Land | Self::Water => Layer::Ground,
        }
    }
}

/// Occupancy layer of a map cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    /// Land and water units, buildings.
    Ground,
    /// Flying units.
    Air,
}

/// Attack skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSkill {
    /// Attack type looked up in the damage multiplier table.
    pub attack_type: String,
    /// Base damage per hit.
    pub strength: u32,
    /// Reach in cells.
    #[serde(with = "decimal_serde")]
    pub range: Fixed,
    /// Seconds between hits.
    #[serde(with = "decimal_serde")]
    pub cooldown: Fixed,
    /// Layers this attack can hit.
    #[serde(default = "default_attack_layers")]
    pub targets: Vec<Layer>,
}

fn default_attack_layers() -> Vec<Layer> {
    vec![Layer::Ground]
}

/// Harvest skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSkill {
    /// Resource types this unit can gather.
    pub resources: Vec<String>,
    /// Maximum amount carried per trip.
    pub capacity: u32,
    /// Units of resource gathered per second.
    #[serde(with = "decimal_serde")]
    pub rate: Fixed,
}

/// Construction skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSkill {
    /// Building templates this unit can place.
    pub buildings: Vec<String>,
    /// Build speed multiplier applied to the building's build time.
    #[serde(default = "default_build_speed", with = "decimal_serde")]
    pub speed: Fixed,
}

fn default_build_speed() -> Fixed {
    Fixed::ONE
}

/// Repair skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSkill {
    /// Hit points restored per second.
    #[serde(with = "decimal_serde")]
    pub rate: Fixed,
}

/// Data-driven unit template.
///
/// # Example RON
///
/// ```ron
/// UnitTemplate(
///     name: "archer",
///     max_health: 400,
///     armor: 10,
///     armor_type: "leather",
///     speed: 2.5,
///     cost: { "gold": 100, "wood": 50 },
///     production_time: 20.0,
///     attack: Some(AttackSkill(
///         attack_type: "piercing",
///         strength: 60,
///         range: 7.0,
///         cooldown: 1.5,
///     )),
///     tags: ["ranged"],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTemplate {
    /// Unique template name.
    pub name: String,

    /// Maximum hit points.
    pub max_health: u32,

    /// Maximum energy (mana); `None` for units without energy.
    #[serde(default)]
    pub max_energy: Option<u32>,

    /// Flat armor subtracted from every hit.
    #[serde(default)]
    pub armor: u32,

    /// Armor type looked up in the damage multiplier table.
    pub armor_type: String,

    /// Cells per second; zero for immobile units.
    #[serde(default, with = "decimal_serde")]
    pub speed: Fixed,

    /// Sight radius in cells.
    #[serde(default = "default_sight")]
    pub sight: u32,

    /// Movement fields; the first entry decides the occupancy layer.
    #[serde(default = "default_fields")]
    pub fields: Vec<Field>,

    /// Production cost.
    #[serde(default)]
    pub cost: ResourceCost,

    /// Production time in seconds.
    #[serde(default, with = "decimal_serde")]
    pub production_time: Fixed,

    /// Attack skill.
    #[serde(default)]
    pub attack: Option<AttackSkill>,

    /// Harvest skill.
    #[serde(default)]
    pub harvest: Option<HarvestSkill>,

    /// Construction skill.
    #[serde(default)]
    pub build: Option<BuildSkill>,

    /// Repair skill.
    #[serde(default)]
    pub repair: Option<RepairSkill>,

    /// Technologies required before this unit can be produced.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Free-form tags used by technology effects.
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn default_sight() -> u32 {
    8
}

fn default_fields() -> Vec<Field> {
    vec![Field::Land]
}

impl UnitTemplate {
    /// Field used for occupancy.
    #[must_use]
    pub fn primary_field(&self) -> Field {
        self.fields.first().copied().unwrap_or(Field::Land)
    }

    /// Whether the unit can move at all.
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        self.speed > Fixed::ZERO
    }

    /// Capability check used by command validation.
    #[must_use]
    pub fn supports(&self, kind: CommandKind) -> bool {
        match kind {
            CommandKind::Stop | CommandKind::Hold => true,
            CommandKind::Move
            | CommandKind::Patrol
            | CommandKind::Follow
            | CommandKind::Formation
            | CommandKind::GroupMove => self.is_mobile(),
            CommandKind::Guard => self.is_mobile() || self.attack.is_some(),
            CommandKind::Attack => self.attack.is_some(),
            CommandKind::Gather => self.harvest.is_some() && self.is_mobile(),
            CommandKind::Build => self.build.is_some(),
            CommandKind::Repair => self.repair.is_some() || self.build.is_some(),
            CommandKind::ProduceUnit
            | CommandKind::StartResearch
            | CommandKind::StartUpgrade
            | CommandKind::CancelProduction
            | CommandKind::ClearProductionQueue
            | CommandKind::SetMeetingPoint => false,
        }
    }

    /// Whether this unit can gather the given resource.
    #[must_use]
    pub fn can_harvest(&self, resource: &str) -> bool {
        self.harvest
            .as_ref()
            .is_some_and(|h| h.resources.iter().any(|r| r == resource))
    }

    /// Whether this unit can place the given building.
    #[must_use]
    pub fn can_build(&self, building: &str) -> bool {
        self.build
            .as_ref()
            .is_some_and(|b| b.buildings.iter().any(|n| n == building))
    }
}
