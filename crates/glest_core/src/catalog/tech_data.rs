//! Technology definitions and their stat effects.

use serde::{Deserialize, Serialize};

use crate::ledger::ResourceCost;
use crate::math::{decimal_serde, Fixed};

/// Unit stat a technology can modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stat {
    /// Maximum hit points.
    MaxHealth,
    /// Flat armor.
    Armor,
    /// Attack strength.
    AttackStrength,
    /// Attack range.
    AttackRange,
    /// Movement speed.
    Speed,
    /// Sight radius.
    Sight,
    /// Harvest rate.
    GatherRate,
}

/// How a technology changes a stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TechEffectType {
    /// Modify a stat by a percentage.
    StatModifierPercent {
        /// The stat to modify.
        stat: Stat,
        /// Percentage modifier (e.g. 15 for +15%).
        percent: i32,
    },
    /// Modify a stat by a flat amount.
    StatModifierFlat {
        /// The stat to modify.
        stat: Stat,
        /// Flat amount to add.
        amount: i32,
    },
}

/// Effect of researching a technology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechEffect {
    /// Type of effect.
    pub effect_type: TechEffectType,

    /// Unit templates this effect applies to.
    /// Empty together with `applies_to_tags` means every unit.
    #[serde(default)]
    pub applies_to: Vec<String>,

    /// Tags this effect applies to.
    #[serde(default)]
    pub applies_to_tags: Vec<String>,
}

impl TechEffect {
    /// Whether the effect targets a unit with this template name and tags.
    #[must_use]
    pub fn applies(&self, unit_type: &str, tags: &[String]) -> bool {
        if self.applies_to.is_empty() && self.applies_to_tags.is_empty() {
            return true;
        }
        self.applies_to.iter().any(|n| n == unit_type)
            || self.applies_to_tags.iter().any(|t| tags.contains(t))
    }
}

/// Data-driven technology definition.
///
/// # Example RON
///
/// ```ron
/// TechDefinition(
///     name: "improved_bows",
///     cost: { "gold": 150, "wood": 100 },
///     research_time: 30.0,
///     prerequisites: [],
///     effects: [
///         TechEffect(
///             effect_type: StatModifierPercent(stat: AttackStrength, percent: 20),
///             applies_to_tags: ["ranged"],
///         ),
///     ],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechDefinition {
    /// Unique technology name.
    pub name: String,

    /// Research cost.
    #[serde(default)]
    pub cost: ResourceCost,

    /// Research time in seconds.
    #[serde(default, with = "decimal_serde")]
    pub research_time: Fixed,

    /// Technologies that must be researched first.
    #[serde(default)]
    pub prerequisites: Vec<String>,

    /// Effects granted on completion.
    #[serde(default)]
    pub effects: Vec<TechEffect>,
}
