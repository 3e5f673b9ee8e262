//! Damage resolution and target selection.
//!
//! Damage per hit is `floor(strength × multiplier) − armor`, never less
//! than one. The multiplier comes from the tech tree's attack-type ×
//! armor-type table and defaults to 1.

use crate::building::Building;
use crate::catalog::Layer;
use crate::events::GameEvent;
use crate::math::{Fixed, Vec2Fixed};
use crate::unit::Unit;
use crate::world::World;
use crate::{EntityId, PlayerId};

/// Damage of one hit after multiplier and armor.
#[must_use]
pub fn calculate_damage(strength: u32, multiplier: Fixed, armor: u32) -> u32 {
    let modified = (Fixed::from_num(strength) * multiplier)
        .max(Fixed::ZERO)
        .floor()
        .to_num::<u32>();
    modified.saturating_sub(armor).max(1)
}

/// What an attacker needs to know about a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TargetInfo {
    pub player: PlayerId,
    pub layer: Layer,
    pub alive: bool,
}

/// Look up a unit or building as a target.
pub(crate) fn target_info(world: &World, id: EntityId) -> Option<TargetInfo> {
    if let Some(unit) = world.entities.unit(id) {
        return Some(TargetInfo {
            player: unit.player,
            layer: unit.layer(),
            alive: unit.is_alive(),
        });
    }
    world.entities.building(id).map(|b| TargetInfo {
        player: b.player,
        layer: Layer::Ground,
        alive: b.is_alive(),
    })
}

/// Distance from a point to a unit's position or a building's footprint.
pub(crate) fn distance_to_entity(world: &World, from: Vec2Fixed, id: EntityId) -> Option<Fixed> {
    if let Some(unit) = world.entities.unit(id) {
        return Some(from.distance(unit.position));
    }
    world.entities.building(id).map(|b| b.distance_to(from))
}

/// Layers the unit's attack can reach; empty without an attack skill.
pub(crate) fn attack_layers(world: &World, unit: &Unit) -> Vec<Layer> {
    world
        .catalog
        .unit(&unit.unit_type)
        .and_then(|t| t.attack.as_ref())
        .map(|a| a.targets.clone())
        .unwrap_or_default()
}

/// Whether `unit` may attack `target` at all, ignoring range.
pub(crate) fn can_attack(world: &World, unit: &Unit, target: EntityId) -> bool {
    let Some(info) = target_info(world, target) else {
        return false;
    };
    info.alive
        && world.are_enemies(unit.player, info.player)
        && attack_layers(world, unit).contains(&info.layer)
}

/// Nearest attackable enemy within `radius`, ties to the lower ID.
pub(crate) fn nearest_enemy(world: &World, unit: &Unit, radius: Fixed) -> Option<EntityId> {
    if unit.stats.attack_strength == 0 {
        return None;
    }
    world
        .entities
        .query_in_radius(unit.position, radius)
        .into_iter()
        .filter(|&id| id != unit.id && can_attack(world, unit, id))
        .filter_map(|id| distance_to_entity(world, unit.position, id).map(|d| (d, id)))
        .min()
        .map(|(_, id)| id)
}

/// Hit `target` if the cooldown allows. Returns the damage dealt.
pub(crate) fn strike(world: &mut World, attacker: &mut Unit, target: EntityId) -> Option<u32> {
    if world.tick < attacker.next_attack_tick {
        return None;
    }
    let catalog = world.catalog.clone();
    let Some(attack) = catalog.unit(&attacker.unit_type).and_then(|t| t.attack.as_ref()) else {
        tracing::error!(unit = attacker.id, "attack skill missing from catalog");
        return None;
    };

    let (armor, armor_type) = if let Some(unit) = world.entities.unit(target) {
        let armor_type = catalog
            .unit(&unit.unit_type)
            .map(|t| t.armor_type.clone())
            .unwrap_or_default();
        (unit.stats.armor, armor_type)
    } else if let Some(building) = world.entities.building(target) {
        building_armor(&catalog, building)
    } else {
        return None;
    };

    let multiplier = catalog.damage_multiplier(&attack.attack_type, &armor_type);
    let damage = calculate_damage(attacker.stats.attack_strength, multiplier, armor);

    let remaining = if let Some(unit) = world.entities.unit_mut(target) {
        unit.health.apply_damage(damage);
        unit.health.current
    } else if let Some(building) = world.entities.building_mut(target) {
        building.health.apply_damage(damage);
        building.health.current
    } else {
        return None;
    };

    attacker.next_attack_tick = world.tick + attacker.stats.attack_cooldown_ticks.max(1);
    world.events.emit(GameEvent::UnitAttacked {
        attacker: attacker.id,
        target,
        damage,
        remaining_health: remaining,
    });
    Some(damage)
}

fn building_armor(catalog: &crate::catalog::Catalog, building: &Building) -> (u32, String) {
    catalog
        .building(&building.building_type)
        .map_or((0, String::new()), |t| (t.armor, t.armor_type.clone()))
}
