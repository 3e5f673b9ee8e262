//! Immutable asset catalog: the tech tree a game is played with.
//!
//! Pure data, loaded from RON. The catalog is built once at game start,
//! validated, and then shared behind an `Arc` for the whole session.
//!
//! **Note:** This module contains no IO. File loading is handled by
//! `glest_server::loader`.

mod building_data;
mod faction_data;
mod tech_data;
mod unit_data;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use building_data::{BuildingTemplate, Generation, UpgradeSkill};
pub use faction_data::{FactionDefinition, StartingEntity};
pub use tech_data::{Stat, TechDefinition, TechEffect, TechEffectType};
pub use unit_data::{AttackSkill, BuildSkill, Field, HarvestSkill, Layer, RepairSkill, UnitTemplate};

use crate::error::{GameError, Result};
use crate::ledger::ResourceCost;
use crate::math::Fixed;

/// Largest resource amount or hit point value a catalog may hold; anything
/// bigger does not fit the integer part of [`Fixed`].
pub const MAX_AMOUNT: u32 = i32::MAX as u32;

/// A resource players can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Unique resource name.
    pub name: String,
    /// Whether the resource comes from map nodes (gold, wood) rather than
    /// buildings (energy).
    #[serde(default = "default_harvestable")]
    pub harvestable: bool,
}

const fn default_harvestable() -> bool {
    true
}

/// One cell of the attack × armor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageMultiplier {
    /// Attack type.
    pub attack: String,
    /// Armor type.
    pub armor: String,
    /// Multiplier in percent (150 = 1.5×).
    pub percent: u32,
}

/// Tech tree document as written in RON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechTreeData {
    /// Tech tree name.
    pub name: String,
    /// Resources.
    pub resources: Vec<ResourceDefinition>,
    /// Attack types.
    pub attack_types: Vec<String>,
    /// Armor types.
    pub armor_types: Vec<String>,
    /// Non-default entries of the damage multiplier table.
    #[serde(default)]
    pub damage_multipliers: Vec<DamageMultiplier>,
    /// Factions.
    pub factions: Vec<FactionDefinition>,
    /// Unit templates.
    #[serde(default)]
    pub units: Vec<UnitTemplate>,
    /// Building templates.
    #[serde(default)]
    pub buildings: Vec<BuildingTemplate>,
    /// Technologies.
    #[serde(default)]
    pub technologies: Vec<TechDefinition>,
}

/// Validated, name-indexed catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    name: String,
    resources: BTreeMap<String, ResourceDefinition>,
    attack_types: BTreeSet<String>,
    armor_types: BTreeSet<String>,
    multipliers: BTreeMap<(String, String), Fixed>,
    factions: BTreeMap<String, FactionDefinition>,
    units: BTreeMap<String, UnitTemplate>,
    buildings: BTreeMap<String, BuildingTemplate>,
    technologies: BTreeMap<String, TechDefinition>,
}

impl Catalog {
    /// Parse and validate a tech tree from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] if the text is not a valid
    /// [`TechTreeData`], or the first reference error found by
    /// [`Catalog::from_data`].
    pub fn from_ron_str(source: &str, origin: &str) -> Result<Self> {
        let data: TechTreeData = ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        Self::from_data(data)
    }

    /// Index and validate tech tree data.
    ///
    /// # Errors
    ///
    /// Returns the first problem reported by [`Catalog::validate`].
    pub fn from_data(data: TechTreeData) -> Result<Self> {
        let catalog = Self::index(data);
        match catalog.validate().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(catalog),
        }
    }

    /// Every reference problem in `data`, without building a catalog.
    #[must_use]
    pub fn check_data(data: TechTreeData) -> Vec<GameError> {
        Self::index(data).validate()
    }

    fn index(data: TechTreeData) -> Self {
        let multipliers = data
            .damage_multipliers
            .into_iter()
            .map(|m| {
                (
                    (m.attack, m.armor),
                    Fixed::from_num(m.percent) / Fixed::from_num(100),
                )
            })
            .collect();

        Self {
            name: data.name,
            resources: data
                .resources
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
            attack_types: data.attack_types.into_iter().collect(),
            armor_types: data.armor_types.into_iter().collect(),
            multipliers,
            factions: data
                .factions
                .into_iter()
                .map(|f| (f.name.clone(), f))
                .collect(),
            units: data.units.into_iter().map(|u| (u.name.clone(), u)).collect(),
            buildings: data
                .buildings
                .into_iter()
                .map(|b| (b.name.clone(), b))
                .collect(),
            technologies: data
                .technologies
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    /// Check every cross-reference and value range, and report all problems
    /// found.
    #[must_use]
    pub fn validate(&self) -> Vec<GameError> {
        let mut problems = Vec::new();
        let mut check = |ok: bool, name: &str, referenced_by: String| {
            if !ok {
                problems.push(GameError::UnknownTemplate {
                    name: name.to_string(),
                    referenced_by,
                });
            }
        };

        for (attack, armor) in self.multipliers.keys() {
            let owner = format!("damage multiplier {attack}/{armor}");
            check(self.attack_types.contains(attack), attack, owner.clone());
            check(self.armor_types.contains(armor), armor, owner);
        }

        for unit in self.units.values() {
            let owner = format!("unit '{}'", unit.name);
            check(
                self.armor_types.contains(&unit.armor_type),
                &unit.armor_type,
                owner.clone(),
            );
            for resource in unit.cost.keys() {
                check(self.resources.contains_key(resource), resource, owner.clone());
            }
            if let Some(attack) = &unit.attack {
                check(
                    self.attack_types.contains(&attack.attack_type),
                    &attack.attack_type,
                    owner.clone(),
                );
            }
            if let Some(harvest) = &unit.harvest {
                for resource in &harvest.resources {
                    check(self.resources.contains_key(resource), resource, owner.clone());
                }
            }
            if let Some(build) = &unit.build {
                for building in &build.buildings {
                    check(self.buildings.contains_key(building), building, owner.clone());
                }
            }
            for tech in &unit.requires {
                check(self.technologies.contains_key(tech), tech, owner.clone());
            }
        }

        for building in self.buildings.values() {
            let owner = format!("building '{}'", building.name);
            check(
                self.armor_types.contains(&building.armor_type),
                &building.armor_type,
                owner.clone(),
            );
            let mut resources: Vec<&String> = building.cost.keys().collect();
            resources.extend(building.stores.iter());
            resources.extend(building.generates.iter().map(|g| &g.resource));
            if let Some(upgrade) = &building.upgrade {
                resources.extend(upgrade.cost.keys());
            }
            for resource in resources {
                check(self.resources.contains_key(resource), resource, owner.clone());
            }
            for unit in &building.produces {
                check(self.units.contains_key(unit), unit, owner.clone());
            }
            for tech in building.researches.iter().chain(&building.requires) {
                check(self.technologies.contains_key(tech), tech, owner.clone());
            }
        }

        for tech in self.technologies.values() {
            let owner = format!("technology '{}'", tech.name);
            for resource in tech.cost.keys() {
                check(self.resources.contains_key(resource), resource, owner.clone());
            }
            for prerequisite in &tech.prerequisites {
                check(
                    self.technologies.contains_key(prerequisite),
                    prerequisite,
                    owner.clone(),
                );
            }
            for effect in &tech.effects {
                for unit in &effect.applies_to {
                    check(self.units.contains_key(unit), unit, owner.clone());
                }
            }
        }

        for faction in self.factions.values() {
            let owner = format!("faction '{}'", faction.name);
            for resource in faction.starting_resources.keys() {
                check(self.resources.contains_key(resource), resource, owner.clone());
            }
            for start in &faction.starting_units {
                check(self.units.contains_key(&start.template), &start.template, owner.clone());
            }
            for start in &faction.starting_buildings {
                check(
                    self.buildings.contains_key(&start.template),
                    &start.template,
                    owner.clone(),
                );
            }
        }

        problems.extend(self.value_problems());
        problems
    }

    /// Values out of range: oversized amounts and empty footprints.
    fn value_problems(&self) -> Vec<GameError> {
        let mut problems = Vec::new();
        for unit in self.units.values() {
            let owner = format!("unit '{}'", unit.name);
            check_costs(&mut problems, &unit.cost, &owner);
            check_amount(&mut problems, "max_health", unit.max_health, &owner);
            if let Some(attack) = &unit.attack {
                check_amount(&mut problems, "attack strength", attack.strength, &owner);
            }
        }
        for building in self.buildings.values() {
            let owner = format!("building '{}'", building.name);
            check_costs(&mut problems, &building.cost, &owner);
            if let Some(upgrade) = &building.upgrade {
                check_costs(&mut problems, &upgrade.cost, &owner);
            }
            check_amount(&mut problems, "max_health", building.max_health, &owner);
            let (w, h) = building.footprint;
            if w == 0 || h == 0 {
                problems.push(GameError::InvalidValue {
                    field: "footprint".to_string(),
                    owner,
                    reason: format!("{w}x{h} covers no cells"),
                });
            }
        }
        for tech in self.technologies.values() {
            check_costs(&mut problems, &tech.cost, &format!("technology '{}'", tech.name));
        }
        for faction in self.factions.values() {
            let owner = format!("faction '{}'", faction.name);
            check_costs(&mut problems, &faction.starting_resources, &owner);
        }
        problems
    }

    /// Tech tree name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Damage multiplier for an attack type against an armor type.
    ///
    /// Missing table entries default to 1.
    #[must_use]
    pub fn damage_multiplier(&self, attack: &str, armor: &str) -> Fixed {
        self.multipliers
            .get(&(attack.to_string(), armor.to_string()))
            .copied()
            .unwrap_or(Fixed::ONE)
    }

    /// Resource definitions in name order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.resources.values()
    }

    /// Whether a resource exists.
    #[must_use]
    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Look up a faction.
    #[must_use]
    pub fn faction(&self, name: &str) -> Option<&FactionDefinition> {
        self.factions.get(name)
    }

    /// Look up a unit template.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitTemplate> {
        self.units.get(name)
    }

    /// Look up a building template.
    #[must_use]
    pub fn building(&self, name: &str) -> Option<&BuildingTemplate> {
        self.buildings.get(name)
    }

    /// Look up a technology.
    #[must_use]
    pub fn technology(&self, name: &str) -> Option<&TechDefinition> {
        self.technologies.get(name)
    }

    /// All technologies in name order.
    pub fn technologies(&self) -> impl Iterator<Item = &TechDefinition> {
        self.technologies.values()
    }
}

fn check_amount(problems: &mut Vec<GameError>, field: &str, value: u32, owner: &str) {
    if value > MAX_AMOUNT {
        problems.push(GameError::InvalidValue {
            field: field.to_string(),
            owner: owner.to_string(),
            reason: format!("{value} exceeds {MAX_AMOUNT}"),
        });
    }
}

fn check_costs(problems: &mut Vec<GameError>, cost: &ResourceCost, owner: &str) {
    for (resource, &amount) in cost {
        check_amount(problems, &format!("amount of {resource}"), amount, owner);
    }
}
