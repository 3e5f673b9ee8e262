//! Building template definitions.

use serde::{Deserialize, Serialize};

use crate::ledger::ResourceCost;
use crate::math::{decimal_serde, Fixed};

/// Passive resource generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Resource produced.
    pub resource: String,
    /// Units produced per second.
    #[serde(with = "decimal_serde")]
    pub per_second: Fixed,
}

/// Self-upgrade a building can research on itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSkill {
    /// Highest reachable level.
    pub max_level: u32,
    /// Cost of each level.
    pub cost: ResourceCost,
    /// Seconds per level.
    #[serde(with = "decimal_serde")]
    pub duration: Fixed,
    /// Extra max health per level, percent of the template value.
    #[serde(default)]
    pub health_bonus_percent: u32,
    /// Extra production speed per level, percent.
    #[serde(default)]
    pub production_speed_percent: u32,
    /// Extra generation per level, percent.
    #[serde(default)]
    pub generation_percent: u32,
}

/// Data-driven building template.
///
/// Footprints are anchored at their minimum corner: a `(2, 2)` building
/// placed at cell `(5, 5)` covers cells `(5..7, 5..7)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingTemplate {
    /// Unique template name.
    pub name: String,

    /// Maximum hit points.
    pub max_health: u32,

    /// Flat armor subtracted from every hit.
    #[serde(default)]
    pub armor: u32,

    /// Armor type looked up in the damage multiplier table.
    pub armor_type: String,

    /// Footprint in cells (width, height).
    #[serde(default = "default_footprint")]
    pub footprint: (u32, u32),

    /// Construction cost.
    #[serde(default)]
    pub cost: ResourceCost,

    /// Construction time in seconds at build speed 1.
    #[serde(default, with = "decimal_serde")]
    pub build_time: Fixed,

    /// Unit templates this building can produce.
    #[serde(default)]
    pub produces: Vec<String>,

    /// Technologies researchable here.
    #[serde(default)]
    pub researches: Vec<String>,

    /// Resources harvesters may deposit here.
    #[serde(default)]
    pub stores: Vec<String>,

    /// Passive generation while built.
    #[serde(default)]
    pub generates: Vec<Generation>,

    /// Self-upgrade definition.
    #[serde(default)]
    pub upgrade: Option<UpgradeSkill>,

    /// Production speed multiplier.
    #[serde(default = "default_production_speed", with = "decimal_serde")]
    pub production_speed: Fixed,

    /// Maximum queued plus in-progress items; `None` uses the game default.
    #[serde(default)]
    pub max_queue: Option<usize>,

    /// Technologies required before this building can be placed.
    #[serde(default)]
    pub requires: Vec<String>,
}

const fn default_footprint() -> (u32, u32) {
    (1, 1)
}

fn default_production_speed() -> Fixed {
    Fixed::ONE
}

impl BuildingTemplate {
    /// Whether this building can produce the given unit type.
    #[must_use]
    pub fn can_produce(&self, unit_type: &str) -> bool {
        self.produces.iter().any(|u| u == unit_type)
    }

    /// Whether this building can research the given technology.
    #[must_use]
    pub fn can_research(&self, tech: &str) -> bool {
        self.researches.iter().any(|t| t == tech)
    }

    /// Whether harvesters can deposit the given resource here.
    #[must_use]
    pub fn stores_resource(&self, resource: &str) -> bool {
        self.stores.iter().any(|r| r == resource)
    }

    /// Maximum upgrade level, zero when the building cannot upgrade.
    #[must_use]
    pub fn max_upgrade_level(&self) -> u32 {
        self.upgrade.as_ref().map_or(0, |u| u.max_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_building_template_from_ron() {
        let ron_text = r#"BuildingTemplate(
            name: "castle",
            max_health: 4000,
            armor: 20,
            armor_type: "stone",
            footprint: (3, 3),
            produces: ["worker"],
            stores: ["gold", "wood"],
            generates: [Generation(resource: "energy", per_second: 0.5)],
        )"#;
        let castle: BuildingTemplate = ron::from_str(ron_text).unwrap();
        assert_eq!(castle.footprint, (3, 3));
        assert!(castle.can_produce("worker"));
        assert!(castle.stores_resource("wood"));
        assert!(!castle.stores_resource("stone"));
        assert_eq!(castle.production_speed, Fixed::ONE);
        assert_eq!(castle.generates[0].per_second, Fixed::from_num(0.5));
        assert_eq!(castle.max_upgrade_level(), 0);
    }
}
