//! Command validation and attachment.
//!
//! A submission is checked in full before anything changes: either every
//! listed entity receives the order, or the world is left untouched and
//! the first failing check is returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::behavior::{can_reach, existing_site, Approach, INTERACT_RANGE};
use crate::catalog::{Catalog, UnitTemplate};
use crate::combat::can_attack;
use crate::command::{Command, CommandSubmission, FormationShape, Order};
use crate::error::CommandError;
use crate::events::ChangeReason;
use crate::math::{fixed_sqrt, Fixed, Vec2Fixed};
use crate::production::{cancel_item, ProductionItem, ProductionKind};
use crate::unit::{Unit, UnitState};
use crate::world::World;
use crate::{EntityId, PlayerId};

/// Largest offset a unit keeps from the group centre on a group move.
pub const GROUP_RADIUS: i32 = 4;

/// Distance between formation slots, in cells.
pub const FORMATION_SPACING: i32 = 2;

type Result<T> = std::result::Result<T, CommandError>;

/// Validate a submission and attach it.
///
/// # Errors
///
/// The first failed check, in order: player, structure, target existence,
/// ownership, capability, target validity, reachability, prerequisites,
/// queue depth, resources.
pub fn dispatch(world: &mut World, submission: &CommandSubmission) -> Result<()> {
    let result = if !world.players.contains_key(&submission.player) {
        Err(CommandError::InvalidPlayer)
    } else if submission.entities.is_empty() {
        Err(CommandError::Malformed)
    } else if submission.command.kind().targets_building() {
        building_command(world, submission)
    } else {
        unit_command(world, submission)
    };

    if let Err(reason) = &result {
        debug!(
            player = submission.player,
            kind = ?submission.command.kind(),
            ?reason,
            "command rejected"
        );
    }
    result
}

// ---------------------------------------------------------------------------
// Unit commands
// ---------------------------------------------------------------------------

fn unit_command(world: &mut World, submission: &CommandSubmission) -> Result<()> {
    let ids: BTreeSet<EntityId> = submission.entities.iter().copied().collect();
    let catalog = Arc::clone(&world.catalog);
    let kind = submission.command.kind();

    let mut units = Vec::with_capacity(ids.len());
    for &id in &ids {
        let Some(unit) = world.entities.unit(id) else {
            return Err(if world.entities.building(id).is_none() {
                CommandError::InvalidTarget
            } else if ids.len() > 1 {
                CommandError::Malformed
            } else {
                CommandError::UnsupportedCapability
            });
        };
        if !unit.is_alive() {
            return Err(CommandError::InvalidTarget);
        }
        if unit.player != submission.player {
            return Err(CommandError::NotOwner);
        }
        let template = catalog
            .unit(&unit.unit_type)
            .ok_or(CommandError::UnsupportedCapability)?;
        if !template.supports(kind) {
            return Err(CommandError::UnsupportedCapability);
        }
        units.push((unit, template));
    }

    let commands = resolve_group(world, &submission.command, &units)?;
    for ((unit, template), command) in units.iter().zip(&commands) {
        validate_target(world, &catalog, unit, template, command)?;
    }
    if let Command::Build { building_type, cell } = &submission.command {
        let adopting = units
            .first()
            .and_then(|(unit, _)| existing_site(world, unit, building_type, *cell))
            .is_some();
        let cost = catalog
            .building(building_type)
            .map(|t| t.cost.clone())
            .unwrap_or_default();
        if !adopting && !world.ledger.can_afford(submission.player, &cost) {
            return Err(CommandError::InsufficientResources);
        }
    }

    let plan: Vec<(EntityId, Command)> = units
        .iter()
        .map(|(unit, _)| unit.id)
        .zip(commands)
        .collect();
    let tick = world.tick;
    for (id, command) in plan {
        if let Some(unit) = world.entities.unit_mut(id) {
            attach(unit, command, submission.queued, tick);
        }
    }
    Ok(())
}

fn attach(unit: &mut Unit, command: Command, queued: bool, tick: u64) {
    let order = Order {
        command,
        queued,
        issued_at: tick,
    };
    if queued {
        unit.commands.push(order);
        return;
    }
    if unit
        .commands
        .current()
        .is_some_and(|current| current.command.same_goal(&order.command))
    {
        return;
    }
    if order.command == Command::Stop && unit.commands.is_empty() && unit.state == UnitState::Idle {
        return;
    }
    unit.commands.set(order);
    unit.reset_task();
    unit.state = UnitState::Idle;
}

/// Per-unit commands, with group and formation offsets filled in.
fn resolve_group(
    world: &World,
    command: &Command,
    units: &[(&Unit, &UnitTemplate)],
) -> Result<Vec<Command>> {
    let in_bounds = |p: Vec2Fixed| world.map.in_bounds(p.cell());
    match command {
        Command::GroupMove { anchor, .. } => {
            if !in_bounds(*anchor) {
                return Err(CommandError::InvalidTarget);
            }
            let positions: Vec<Vec2Fixed> = units.iter().map(|(u, _)| u.position).collect();
            Ok(group_offsets(&positions)
                .into_iter()
                .map(|offset| Command::GroupMove {
                    anchor: *anchor,
                    offset,
                })
                .collect())
        }
        Command::Formation { anchor, shape, .. } => {
            if !in_bounds(*anchor) {
                return Err(CommandError::InvalidTarget);
            }
            Ok(formation_offsets(*shape, units.len())
                .into_iter()
                .map(|offset| Command::Formation {
                    anchor: *anchor,
                    shape: *shape,
                    offset,
                })
                .collect())
        }
        other => Ok(vec![other.clone(); units.len()]),
    }
}

/// Offsets from the centroid, each clamped to [`GROUP_RADIUS`].
pub fn group_offsets(positions: &[Vec2Fixed]) -> Vec<Vec2Fixed> {
    if positions.is_empty() {
        return Vec::new();
    }
    let count = Fixed::from_num(positions.len());
    let sum = positions
        .iter()
        .fold(Vec2Fixed::ZERO, |acc, &p| acc + p);
    let centroid = Vec2Fixed::new(sum.x / count, sum.y / count);
    let radius = Fixed::from_num(GROUP_RADIUS);
    positions
        .iter()
        .map(|&p| {
            let offset = p - centroid;
            let length = fixed_sqrt(offset.dot(offset));
            if length > radius {
                Vec2Fixed::new(offset.x * radius / length, offset.y * radius / length)
            } else {
                offset
            }
        })
        .collect()
}

/// Slot offsets for `count` units in ascending ID order.
pub fn formation_offsets(shape: FormationShape, count: usize) -> Vec<Vec2Fixed> {
    let centered = |index: usize, span: usize| -> Fixed {
        Fixed::from_num(FORMATION_SPACING * index as i32 - (span as i32 - 1))
    };
    match shape {
        FormationShape::Line => (0..count)
            .map(|i| Vec2Fixed::new(centered(i, count), Fixed::ZERO))
            .collect(),
        FormationShape::Column => (0..count)
            .map(|i| Vec2Fixed::new(Fixed::ZERO, centered(i, count)))
            .collect(),
        FormationShape::Box => {
            let side = (1..=count).find(|s| s * s >= count).unwrap_or(1);
            let rows = count.div_ceil(side);
            (0..count)
                .map(|i| Vec2Fixed::new(centered(i % side, side), centered(i / side, rows)))
                .collect()
        }
    }
}

fn reachable(world: &World, unit: &Unit, approach: Approach) -> Result<()> {
    if can_reach(world, unit, &approach) {
        Ok(())
    } else {
        Err(CommandError::Unreachable)
    }
}

fn validate_target(
    world: &World,
    catalog: &Catalog,
    unit: &Unit,
    template: &UnitTemplate,
    command: &Command,
) -> Result<()> {
    match command {
        Command::Stop | Command::Hold => Ok(()),
        Command::Move { target } | Command::Patrol { target } => {
            if !world.map.in_bounds(target.cell()) {
                return Err(CommandError::InvalidTarget);
            }
            reachable(world, unit, Approach::point(*target))
        }
        Command::GroupMove { anchor, .. } | Command::Formation { anchor, .. } => {
            reachable(world, unit, Approach::point(*anchor))
        }
        Command::Attack { target } => {
            if !can_attack(world, unit, *target) {
                return Err(CommandError::InvalidTarget);
            }
            let approach = Approach::entity(world, *target, unit.stats.attack_range)
                .ok_or(CommandError::InvalidTarget)?;
            reachable(world, unit, approach)
        }
        Command::Follow { target } => {
            let leader = world
                .entities
                .unit(*target)
                .filter(|u| u.is_alive() && u.id != unit.id)
                .ok_or(CommandError::InvalidTarget)?;
            reachable(world, unit, Approach::near(leader.position, Fixed::ONE))
        }
        Command::Guard { target } => {
            let alive = world
                .entities
                .unit(*target)
                .map(Unit::is_alive)
                .or_else(|| world.entities.building(*target).map(|b| b.is_alive()));
            if *target == unit.id || alive != Some(true) {
                return Err(CommandError::InvalidTarget);
            }
            if !template.is_mobile() {
                return Ok(());
            }
            let approach =
                Approach::entity(world, *target, Fixed::ONE).ok_or(CommandError::InvalidTarget)?;
            reachable(world, unit, approach)
        }
        Command::Gather { node } => {
            let node = world
                .nodes
                .get(node)
                .filter(|n| !n.is_depleted())
                .ok_or(CommandError::InvalidTarget)?;
            if !template.can_harvest(&node.resource) {
                return Err(CommandError::UnsupportedCapability);
            }
            reachable(world, unit, Approach::footprint(node.cell, (1, 1), INTERACT_RANGE))
        }
        Command::Build { building_type, cell } => {
            if !template.can_build(building_type) {
                return Err(CommandError::UnsupportedCapability);
            }
            let building = catalog
                .building(building_type)
                .ok_or(CommandError::InvalidTarget)?;
            if existing_site(world, unit, building_type, *cell).is_none() {
                world
                    .check_footprint(*cell, building.footprint)
                    .map_err(|_| CommandError::InvalidTarget)?;
            }
            reachable(
                world,
                unit,
                Approach::footprint(*cell, building.footprint, INTERACT_RANGE),
            )?;
            let owner = world.player(unit.player).ok_or(CommandError::InvalidPlayer)?;
            if !owner.has_all_techs(&building.requires) {
                return Err(CommandError::PrerequisitesNotMet);
            }
            Ok(())
        }
        Command::Repair { target } => {
            let building = world
                .entities
                .building(*target)
                .filter(|b| b.is_alive() && !world.are_enemies(unit.player, b.player))
                .ok_or(CommandError::InvalidTarget)?;
            if building.built && building.health.is_full() {
                return Err(CommandError::InvalidTarget);
            }
            if !building.built && template.build.is_none() {
                return Err(CommandError::UnsupportedCapability);
            }
            reachable(
                world,
                unit,
                Approach::footprint(building.cell, building.footprint, INTERACT_RANGE),
            )
        }
        _ => Err(CommandError::UnsupportedCapability),
    }
}

// ---------------------------------------------------------------------------
// Building commands
// ---------------------------------------------------------------------------

fn building_command(world: &mut World, submission: &CommandSubmission) -> Result<()> {
    let [id] = submission.entities.as_slice() else {
        return Err(CommandError::Malformed);
    };
    let id = *id;
    let Some(building) = world.entities.building(id) else {
        return Err(if world.entities.unit(id).is_some() {
            CommandError::UnsupportedCapability
        } else {
            CommandError::InvalidTarget
        });
    };
    if !building.is_alive() {
        return Err(CommandError::InvalidTarget);
    }
    if building.player != submission.player {
        return Err(CommandError::NotOwner);
    }
    let catalog = Arc::clone(&world.catalog);
    let template = catalog
        .building(&building.building_type)
        .ok_or(CommandError::UnsupportedCapability)?;
    let player = submission.player;

    match &submission.command {
        Command::ProduceUnit { unit_type } => {
            if !template.can_produce(unit_type) {
                return Err(CommandError::UnsupportedCapability);
            }
            let unit = catalog
                .unit(unit_type)
                .ok_or(CommandError::UnsupportedCapability)?;
            let has_techs = world
                .player(player)
                .is_some_and(|p| p.has_all_techs(&unit.requires));
            if !building.built || !has_techs {
                return Err(CommandError::PrerequisitesNotMet);
            }
            let item = ProductionItem::new(
                ProductionKind::Unit,
                unit_type,
                unit.cost.clone(),
                unit.production_time,
                id,
            );
            enqueue(world, player, item)
        }
        Command::StartResearch { tech } => {
            if !template.can_research(tech) {
                return Err(CommandError::UnsupportedCapability);
            }
            let definition = catalog
                .technology(tech)
                .ok_or(CommandError::UnsupportedCapability)?;
            if research_pending(world, player, tech) {
                return Err(CommandError::AlreadyResearched);
            }
            let has_techs = world
                .player(player)
                .is_some_and(|p| p.has_all_techs(&definition.prerequisites));
            if !building.built || !has_techs {
                return Err(CommandError::PrerequisitesNotMet);
            }
            let item = ProductionItem::new(
                ProductionKind::Research,
                tech,
                definition.cost.clone(),
                definition.research_time,
                id,
            );
            enqueue(world, player, item)
        }
        Command::StartUpgrade => {
            let upgrade = template
                .upgrade
                .as_ref()
                .ok_or(CommandError::UnsupportedCapability)?;
            if !building.built {
                return Err(CommandError::PrerequisitesNotMet);
            }
            if building.upgrade_level + building.pending_upgrades() >= building.max_upgrade_level {
                return Err(CommandError::MaxUpgradeLevel);
            }
            let item = ProductionItem::new(
                ProductionKind::Upgrade,
                &building.building_type,
                upgrade.cost.clone(),
                upgrade.duration,
                id,
            );
            enqueue(world, player, item)
        }
        Command::CancelProduction { index } => {
            let Some(building) = world.entities.building_mut(id) else {
                return Err(CommandError::InvalidTarget);
            };
            let item = match index {
                None => building.production.take_last(),
                Some(index) => building.production.remove_waiting(*index),
            }
            .ok_or(CommandError::InvalidTarget)?;
            cancel_item(world, item);
            Ok(())
        }
        Command::ClearProductionQueue => {
            let Some(building) = world.entities.building_mut(id) else {
                return Err(CommandError::InvalidTarget);
            };
            for item in building.production.drain() {
                cancel_item(world, item);
            }
            Ok(())
        }
        Command::SetMeetingPoint { position } => {
            if position.is_some_and(|p| !world.map.in_bounds(p.cell())) {
                return Err(CommandError::InvalidTarget);
            }
            if let Some(building) = world.entities.building_mut(id) {
                building.meeting_point = *position;
            }
            Ok(())
        }
        _ => Err(CommandError::UnsupportedCapability),
    }
}

/// Researched already, or queued in any of the player's buildings.
fn research_pending(world: &World, player: PlayerId, tech: &str) -> bool {
    world.player(player).is_some_and(|p| p.has_tech(tech))
        || world
            .entities
            .buildings()
            .filter(|b| b.player == player && b.is_alive())
            .flat_map(|b| b.production.items())
            .any(|item| item.kind == ProductionKind::Research && item.name == tech)
}

/// Debit and queue an item; nothing changes unless both succeed.
fn enqueue(world: &mut World, player: PlayerId, item: ProductionItem) -> Result<()> {
    let building_id = item.building;
    if world
        .entities
        .building(building_id)
        .map_or(true, |b| b.production.is_full())
    {
        return Err(CommandError::QueueFull);
    }
    world
        .ledger
        .debit(player, &item.cost, ChangeReason::Production, &mut world.events)
        .map_err(|_| CommandError::InsufficientResources)?;
    let Some(building) = world.entities.building_mut(building_id) else {
        return Err(CommandError::InvalidTarget);
    };
    building.production.push(item)
}
