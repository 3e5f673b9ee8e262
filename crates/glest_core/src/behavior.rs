//! Per-unit state machine.
//!
//! Each tick a live unit promotes its next order if nothing is current and
//! advances the current one by a single step. Movement follows A* paths
//! one waypoint at a time, claiming cell occupancy as it goes; every other
//! order is a movement phase followed by an in-range action.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use crate::combat::{self, can_attack};
use crate::command::Command;
use crate::economy::{nearest_node, nearest_store};
use crate::error::CommandError;
use crate::events::{ChangeReason, EntityKind, GameEvent};
use crate::ledger::ResourceCost;
use crate::math::{CellCoord, Fixed, Vec2Fixed};
use crate::pathfinding::{find_path, smooth_path, DEFAULT_SEARCH_BUDGET, DIRECTIONS};
use crate::unit::{GatherPhase, Navigation, Unit, UnitState};
use crate::world::{CreateOptions, World};
use crate::EntityId;

/// Positions closer than this to a destination snap onto it (1/256 cell).
pub const ARRIVAL_EPSILON: Fixed = Fixed::from_bits(1 << 24);

/// Reach for gathering, depositing, building and repairing (1.5 cells).
pub const INTERACT_RANGE: Fixed = Fixed::from_bits(3 << 31);

/// How close a follower stays to its leader.
pub const FOLLOW_DISTANCE: Fixed = Fixed::from_bits(2 << 32);

/// How far a guard strays from what it guards before walking back.
pub const GUARD_LEASH: Fixed = Fixed::from_bits(3 << 32);

/// Group members blocked this close to their slot count as arrived.
const GROUP_SLACK: Fixed = Fixed::from_bits(3 << 31);

/// Where a unit is heading and when it counts as there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Approach {
    /// Point steered toward.
    pub anchor: Vec2Fixed,
    /// Cell the path is planned to.
    pub goal_cell: CellCoord,
    min: Vec2Fixed,
    max: Vec2Fixed,
    range: Fixed,
    /// Exact point destination; snapped onto on arrival.
    exact: bool,
}

impl Approach {
    /// Walk to an exact point.
    pub fn point(target: Vec2Fixed) -> Self {
        Self {
            anchor: target,
            goal_cell: target.cell(),
            min: target,
            max: target,
            range: ARRIVAL_EPSILON,
            exact: true,
        }
    }

    /// Get within `range` of a moving unit.
    pub fn near(position: Vec2Fixed, range: Fixed) -> Self {
        Self {
            anchor: position,
            goal_cell: position.cell(),
            min: position,
            max: position,
            range,
            exact: false,
        }
    }

    /// Get within `range` of a rectangle of cells.
    pub fn footprint(cell: CellCoord, size: (u32, u32), range: Fixed) -> Self {
        let min = Vec2Fixed::from_cell(cell);
        let max = Vec2Fixed::from_cell((
            cell.0 + size.0.max(1) as i32,
            cell.1 + size.1.max(1) as i32,
        ));
        let two = Fixed::from_num(2);
        Self {
            anchor: Vec2Fixed::new((min.x + max.x) / two, (min.y + max.y) / two),
            goal_cell: cell,
            min,
            max,
            range,
            exact: false,
        }
    }

    /// Approach an entity by ID: a unit's position or a building's footprint.
    pub fn entity(world: &World, id: EntityId, range: Fixed) -> Option<Self> {
        if let Some(unit) = world.entities.unit(id) {
            return Some(Self::near(unit.position, range));
        }
        world
            .entities
            .building(id)
            .map(|b| Self::footprint(b.cell, b.footprint, range))
    }

    pub fn distance(&self, from: Vec2Fixed) -> Fixed {
        from.distance_to_rect(self.min, self.max)
    }

    pub fn reached(&self, from: Vec2Fixed) -> bool {
        self.distance(from) <= self.range
    }

    /// Whether a path may end inside `cell` even though it is blocked.
    fn covers(&self, (x, y): CellCoord) -> bool {
        if self.exact {
            return false;
        }
        if self.min == self.max {
            return (x, y) == self.goal_cell;
        }
        let (x0, y0) = self.min.cell();
        let (x1, y1) = self.max.cell();
        (x0..x1).contains(&x) && (y0..y1).contains(&y)
    }
}

/// Result of one movement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Travel {
    Arrived,
    EnRoute,
    Blocked,
}

/// Result of advancing an order by one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Continue,
    Done,
    Failed(CommandError),
}

/// Whether `unit` could get to `approach` right now.
pub(crate) fn can_reach(world: &World, unit: &Unit, approach: &Approach) -> bool {
    if approach.reached(unit.position) {
        return true;
    }
    if unit.stats.speed <= Fixed::ZERO {
        return false;
    }
    let passable = |c: CellCoord| world.is_passable(c, &unit.fields) || approach.covers(c);
    find_path(unit.cell(), approach.goal_cell, &passable, DEFAULT_SEARCH_BUDGET).is_some()
}

/// Advance one unit by one tick.
pub(crate) fn update_unit(world: &mut World, id: EntityId) {
    let Some(mut unit) = world.entities.take_unit(id) else {
        return;
    };
    match unit.state {
        UnitState::Dead => {}
        UnitState::Dying => {
            unit.state = UnitState::Dead;
            world.events.emit(GameEvent::UnitDied {
                entity: unit.id,
                kind: EntityKind::Unit,
                player: unit.player,
            });
        }
        _ if unit.health.is_dead() => {}
        _ => {
            if unit.commands.promote() {
                unit.reset_task();
                unit.state = UnitState::Idle;
            }
            execute(world, &mut unit);
        }
    }
    world.entities.restore_unit(unit);
}

fn execute(world: &mut World, unit: &mut Unit) {
    let Some(order) = unit.commands.current().cloned() else {
        unit.state = UnitState::Idle;
        unit.velocity = Vec2Fixed::ZERO;
        return;
    };

    let outcome = match &order.command {
        Command::Move { target } => move_to(world, unit, clamp_to_map(world, *target), false),
        Command::GroupMove { anchor, offset } | Command::Formation { anchor, offset, .. } => {
            move_to(world, unit, clamp_to_map(world, *anchor + *offset), true)
        }
        Command::Stop => {
            unit.commands.clear();
            halt(unit);
            Outcome::Done
        }
        Command::Hold => hold(world, unit),
        Command::Attack { target } => attack(world, unit, *target),
        Command::Patrol { target } => patrol(world, unit, clamp_to_map(world, *target)),
        Command::Follow { target } => follow(world, unit, *target),
        Command::Guard { target } => guard(world, unit, *target),
        Command::Gather { node } => gather(world, unit, *node),
        Command::Build { building_type, cell } => build(world, unit, building_type, *cell),
        Command::Repair { target } => repair(world, unit, *target),
        other => {
            tracing::error!(unit = unit.id, kind = ?other.kind(), "building command on a unit");
            Outcome::Failed(CommandError::UnsupportedCapability)
        }
    };

    match outcome {
        Outcome::Continue => {}
        Outcome::Done => finish(unit),
        Outcome::Failed(reason) => {
            debug!(unit = unit.id, ?reason, "order failed");
            finish(unit);
            world.events.emit(GameEvent::CommandFailed {
                unit: unit.id,
                reason,
            });
        }
    }
}

fn finish(unit: &mut Unit) {
    unit.commands.complete();
    unit.reset_task();
    unit.state = UnitState::Idle;
}

fn clamp_to_map(world: &World, point: Vec2Fixed) -> Vec2Fixed {
    // Last representable point inside the far cell.
    let max_x = (Fixed::saturating_from_num(world.map.width()) - Fixed::DELTA).max(Fixed::ZERO);
    let max_y = (Fixed::saturating_from_num(world.map.height()) - Fixed::DELTA).max(Fixed::ZERO);
    Vec2Fixed::new(
        point.x.clamp(Fixed::ZERO, max_x),
        point.y.clamp(Fixed::ZERO, max_y),
    )
}

fn halt(unit: &mut Unit) {
    unit.velocity = Vec2Fixed::ZERO;
    unit.nav.clear();
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Put the unit at `next`, claiming the cell it lands in.
fn relocate(world: &mut World, unit: &mut Unit, next: Vec2Fixed) -> bool {
    let cell = next.cell();
    if unit.occupied != Some(cell) {
        let layer = unit.layer();
        if !world.is_passable(cell, &unit.fields) || !world.map.occupy(cell, layer, unit.id) {
            return false;
        }
        if let Some(old) = unit.occupied.replace(cell) {
            world.map.release(old, layer, unit.id);
        }
    }
    unit.velocity = next - unit.position;
    unit.position = next;
    true
}

fn arrive(world: &mut World, unit: &mut Unit, approach: &Approach) -> Travel {
    if approach.exact && unit.position != approach.anchor && !relocate(world, unit, approach.anchor) {
        return Travel::Blocked;
    }
    unit.nav.clear();
    Travel::Arrived
}

fn plan(world: &World, unit: &mut Unit, approach: &Approach) -> bool {
    let fields = &unit.fields;
    let start = unit.cell();
    let passable = |c: CellCoord| world.is_passable(c, fields);
    let toward_goal = |c: CellCoord| passable(c) || approach.covers(c);
    let Some(path) = find_path(start, approach.goal_cell, &toward_goal, DEFAULT_SEARCH_BUDGET) else {
        return false;
    };
    let walkable: Vec<CellCoord> = path
        .into_iter()
        .take_while(|&c| c == start || passable(c))
        .collect();
    let mut waypoints: VecDeque<Vec2Fixed> = smooth_path(walkable, &passable)
        .into_iter()
        .skip(1)
        .map(Vec2Fixed::from_cell)
        .collect();
    if approach.exact {
        if waypoints.back().is_some_and(|w| w.cell() == approach.goal_cell) {
            waypoints.pop_back();
        }
        waypoints.push_back(approach.anchor);
    }
    if waypoints.is_empty() {
        return false;
    }
    unit.nav = Navigation {
        goal_cell: Some(approach.goal_cell),
        waypoints,
        detour: false,
    };
    true
}

/// Take one step of at most `speed × dt` toward `approach`.
pub(crate) fn travel(world: &mut World, unit: &mut Unit, approach: &Approach) -> Travel {
    if approach.reached(unit.position) {
        return arrive(world, unit, approach);
    }
    if unit.stats.speed <= Fixed::ZERO {
        return Travel::Blocked;
    }

    let stale = unit.nav.waypoints.is_empty()
        || (!unit.nav.detour && unit.nav.goal_cell != Some(approach.goal_cell));
    if stale && !plan(world, unit, approach) {
        return Travel::Blocked;
    }
    let Some(&waypoint) = unit.nav.waypoints.front() else {
        return Travel::Blocked;
    };

    let (mut next, mut reached) = unit
        .position
        .step_towards(waypoint, unit.stats.speed * world.dt());
    if !reached && next.distance(waypoint) <= ARRIVAL_EPSILON {
        next = waypoint;
        reached = true;
    }
    if !relocate(world, unit, next) {
        return detour(world, unit, approach);
    }

    if reached {
        unit.nav.waypoints.pop_front();
        if unit.nav.detour {
            unit.nav.clear();
        }
    }
    if approach.reached(unit.position) {
        return arrive(world, unit, approach);
    }
    Travel::EnRoute
}

/// Step aside once to the free neighbour nearest the goal.
fn detour(world: &World, unit: &mut Unit, approach: &Approach) -> Travel {
    if unit.nav.detour {
        return Travel::Blocked;
    }
    let (cx, cy) = unit.occupied.unwrap_or_else(|| unit.cell());
    let best = DIRECTIONS
        .iter()
        .map(|&(dx, dy)| (cx + dx, cy + dy))
        .filter(|&c| world.is_free_for(c, &unit.fields) && world.is_passable(c, &unit.fields))
        .min_by_key(|&c| Vec2Fixed::from_cell(c).distance_squared(approach.anchor));
    match best {
        Some(cell) => {
            unit.nav = Navigation {
                goal_cell: None,
                waypoints: VecDeque::from([Vec2Fixed::from_cell(cell)]),
                detour: true,
            };
            unit.velocity = Vec2Fixed::ZERO;
            Travel::EnRoute
        }
        None => Travel::Blocked,
    }
}

/// Move phase shared by every order: `Some(outcome)` until in range.
fn approach_phase(world: &mut World, unit: &mut Unit, approach: &Approach) -> Option<Outcome> {
    match travel(world, unit, approach) {
        Travel::Arrived => None,
        Travel::EnRoute => {
            unit.state = UnitState::Moving {
                target: approach.anchor,
            };
            Some(Outcome::Continue)
        }
        Travel::Blocked => Some(Outcome::Failed(CommandError::Unreachable)),
    }
}

fn move_to(world: &mut World, unit: &mut Unit, target: Vec2Fixed, in_group: bool) -> Outcome {
    let approach = Approach::point(target);
    match travel(world, unit, &approach) {
        Travel::Arrived => Outcome::Done,
        Travel::EnRoute => {
            unit.state = UnitState::Moving { target };
            Outcome::Continue
        }
        Travel::Blocked if in_group && approach.distance(unit.position) <= GROUP_SLACK => {
            Outcome::Done
        }
        Travel::Blocked => Outcome::Failed(CommandError::Unreachable),
    }
}

// ---------------------------------------------------------------------------
// Combat
// ---------------------------------------------------------------------------

fn engage(world: &mut World, unit: &mut Unit, target: EntityId) {
    halt(unit);
    unit.state = UnitState::Attacking { target };
    combat::strike(world, unit, target);
}

fn attack(world: &mut World, unit: &mut Unit, target: EntityId) -> Outcome {
    if !can_attack(world, unit, target) {
        return Outcome::Done;
    }
    let Some(approach) = Approach::entity(world, target, unit.stats.attack_range) else {
        return Outcome::Done;
    };
    if approach.reached(unit.position) {
        engage(world, unit, target);
        return Outcome::Continue;
    }
    if let Some(outcome) = approach_phase(world, unit, &approach) {
        return outcome;
    }
    engage(world, unit, target);
    Outcome::Continue
}

fn hold(world: &mut World, unit: &mut Unit) -> Outcome {
    unit.velocity = Vec2Fixed::ZERO;
    match combat::nearest_enemy(world, unit, unit.stats.attack_range) {
        Some(enemy) => engage(world, unit, enemy),
        None => unit.state = UnitState::Idle,
    }
    Outcome::Continue
}

fn patrol(world: &mut World, unit: &mut Unit, target: Vec2Fixed) -> Outcome {
    if unit.task.patrol_origin.is_none() {
        unit.task.patrol_origin = Some(unit.position);
        unit.task.patrol_outbound = true;
    }
    if let Some(enemy) = combat::nearest_enemy(world, unit, unit.stats.attack_range) {
        engage(world, unit, enemy);
        return Outcome::Continue;
    }

    let origin = unit.task.patrol_origin.unwrap_or(unit.position);
    let leg_end = if unit.task.patrol_outbound { target } else { origin };
    match travel(world, unit, &Approach::point(leg_end)) {
        Travel::Arrived => {
            unit.task.patrol_outbound = !unit.task.patrol_outbound;
            unit.state = UnitState::Idle;
            Outcome::Continue
        }
        Travel::EnRoute => {
            unit.state = UnitState::Moving { target: leg_end };
            Outcome::Continue
        }
        Travel::Blocked => Outcome::Failed(CommandError::Unreachable),
    }
}

/// Stay within `distance` of an entity. Waits in place while blocked.
fn keep_near(world: &mut World, unit: &mut Unit, position: Vec2Fixed, distance: Fixed) {
    let approach = Approach::near(position, distance);
    match travel(world, unit, &approach) {
        Travel::EnRoute => {
            unit.state = UnitState::Moving { target: position };
        }
        Travel::Arrived | Travel::Blocked => {
            halt(unit);
            unit.state = UnitState::Idle;
        }
    }
}

fn follow(world: &mut World, unit: &mut Unit, target: EntityId) -> Outcome {
    let Some(leader) = world.entities.unit(target).filter(|u| u.is_alive()) else {
        return Outcome::Done;
    };
    let position = leader.position;
    keep_near(world, unit, position, FOLLOW_DISTANCE);
    Outcome::Continue
}

fn guard(world: &mut World, unit: &mut Unit, target: EntityId) -> Outcome {
    let alive = world.entities.unit(target).map(Unit::is_alive).or_else(|| {
        world.entities.building(target).map(crate::building::Building::is_alive)
    });
    if alive != Some(true) {
        return Outcome::Done;
    }
    let Some(guarded) = world.entities.position_of(target) else {
        return Outcome::Done;
    };

    let sight = Fixed::from_num(unit.stats.sight);
    let within_leash = guarded.distance(unit.position) <= GUARD_LEASH + sight;
    if within_leash {
        if let Some(enemy) = combat::nearest_enemy(world, unit, sight) {
            match attack(world, unit, enemy) {
                Outcome::Continue => return Outcome::Continue,
                Outcome::Done | Outcome::Failed(_) => halt(unit),
            }
        }
    }
    keep_near(world, unit, guarded, GUARD_LEASH);
    Outcome::Continue
}

// ---------------------------------------------------------------------------
// Economy
// ---------------------------------------------------------------------------

fn live_node(world: &World, id: EntityId) -> bool {
    world.nodes.get(&id).is_some_and(|n| !n.is_depleted())
}

fn gather(world: &mut World, unit: &mut Unit, commanded: EntityId) -> Outcome {
    let catalog = Arc::clone(&world.catalog);
    let Some(capacity) = catalog
        .unit(&unit.unit_type)
        .and_then(|t| t.harvest.as_ref())
        .map(|h| h.capacity)
    else {
        return Outcome::Failed(CommandError::UnsupportedCapability);
    };

    let resource = match &unit.task.gather_resource {
        Some(resource) => resource.clone(),
        None => match world.nodes.get(&commanded) {
            Some(node) => node.resource.clone(),
            None => return Outcome::Done,
        },
    };
    unit.task.gather_resource = Some(resource.clone());
    unit.carried.retain(|r, _| *r == resource);
    let carried = unit.carried.get(&resource).copied().unwrap_or(0);

    if unit.task.gather_phase == GatherPhase::ToNode {
        let preferred = unit.task.gather_node.unwrap_or(commanded);
        let node = if live_node(world, preferred) {
            Some(preferred)
        } else {
            nearest_node(world, &resource, unit.position)
        };
        match node {
            Some(node) if carried < capacity => {
                return harvest(world, unit, node, &resource, capacity);
            }
            None if carried == 0 => return Outcome::Done,
            _ => {
                unit.task.gather_phase = GatherPhase::ToDeposit;
                unit.nav.clear();
            }
        }
    }
    deposit(world, unit, &resource)
}

fn harvest(
    world: &mut World,
    unit: &mut Unit,
    node_id: EntityId,
    resource: &str,
    capacity: u32,
) -> Outcome {
    if unit.task.gather_node != Some(node_id) {
        unit.task.gather_node = Some(node_id);
        unit.nav.clear();
    }
    let Some(cell) = world.nodes.get(&node_id).map(|n| n.cell) else {
        return Outcome::Done;
    };
    let approach = Approach::footprint(cell, (1, 1), INTERACT_RANGE);
    if let Some(outcome) = approach_phase(world, unit, &approach) {
        return outcome;
    }

    unit.state = UnitState::Gathering { node: node_id };
    unit.velocity = Vec2Fixed::ZERO;
    unit.task.gather_progress +=
        unit.stats.gather_rate * world.dt() * world.settings.resource_multiplier;
    let whole = unit.task.gather_progress.floor();
    unit.task.gather_progress -= whole;

    let carried = unit.carried.get(resource).copied().unwrap_or(0);
    let wanted = whole.to_num::<u32>().min(capacity.saturating_sub(carried));
    let mut depleted = false;
    if wanted > 0 {
        if let Some(node) = world.nodes.get_mut(&node_id) {
            let taken = node.extract(wanted);
            *unit.carried.entry(resource.to_string()).or_default() += taken;
            if taken > 0 && node.is_depleted() {
                depleted = true;
            }
        }
    }
    if depleted {
        world.events.emit(GameEvent::NodeDepleted { node: node_id });
    }

    let carried = unit.carried.get(resource).copied().unwrap_or(0);
    if carried >= capacity || depleted {
        unit.task.gather_phase = GatherPhase::ToDeposit;
        unit.task.gather_progress = Fixed::ZERO;
        unit.nav.clear();
    }
    Outcome::Continue
}

fn deposit(world: &mut World, unit: &mut Unit, resource: &str) -> Outcome {
    let Some(store) = nearest_store(world, unit.player, resource, unit.position) else {
        halt(unit);
        unit.state = UnitState::Idle;
        return Outcome::Continue;
    };
    let Some(approach) = Approach::entity(world, store, INTERACT_RANGE) else {
        return Outcome::Continue;
    };
    if let Some(outcome) = approach_phase(world, unit, &approach) {
        return outcome;
    }

    let load = std::mem::take(&mut unit.carried);
    world
        .ledger
        .credit(unit.player, &load, ChangeReason::Gathered, &mut world.events);
    unit.task.gather_phase = GatherPhase::ToNode;
    unit.state = UnitState::Idle;
    halt(unit);

    let more = unit.task.gather_node.is_some_and(|n| live_node(world, n))
        || nearest_node(world, resource, unit.position).is_some();
    if more {
        Outcome::Continue
    } else {
        Outcome::Done
    }
}

// ---------------------------------------------------------------------------
// Construction and repair
// ---------------------------------------------------------------------------

fn build_speed(world: &World, unit: &Unit) -> Option<Fixed> {
    world
        .catalog
        .unit(&unit.unit_type)
        .and_then(|t| t.build.as_ref())
        .map(|b| b.speed)
}

/// Unbuilt site of the same type already standing at `cell`.
pub(crate) fn existing_site(
    world: &World,
    unit: &Unit,
    building_type: &str,
    cell: CellCoord,
) -> Option<EntityId> {
    world
        .map
        .occupant(cell, crate::catalog::Layer::Ground)
        .and_then(|id| world.entities.building(id))
        .filter(|b| {
            b.cell == cell
                && b.player == unit.player
                && b.building_type == building_type
                && !b.built
                && b.is_alive()
        })
        .map(|b| b.id)
}

fn build(world: &mut World, unit: &mut Unit, building_type: &str, cell: CellCoord) -> Outcome {
    let Some(speed) = build_speed(world, unit) else {
        return Outcome::Failed(CommandError::UnsupportedCapability);
    };
    let site = unit
        .task
        .build_site
        .or_else(|| existing_site(world, unit, building_type, cell));
    if let Some(site) = site {
        unit.task.build_site = Some(site);
        return construct(world, unit, site, speed);
    }

    let Some(footprint) = world.catalog.building(building_type).map(|t| t.footprint) else {
        return Outcome::Failed(CommandError::InvalidTarget);
    };
    let approach = Approach::footprint(cell, footprint, INTERACT_RANGE);
    if let Some(outcome) = approach_phase(world, unit, &approach) {
        return outcome;
    }

    match world.create_building(unit.player, building_type, cell, CreateOptions::site()) {
        Ok(site) => {
            unit.task.build_site = Some(site);
            unit.state = UnitState::Building { target: site };
            unit.velocity = Vec2Fixed::ZERO;
            world.events.emit(GameEvent::ConstructionStarted {
                building: site,
                builder: unit.id,
                player: unit.player,
            });
            Outcome::Continue
        }
        Err(err) => {
            debug!(unit = unit.id, %err, "construction site could not be placed");
            Outcome::Failed(CommandError::InvalidTarget)
        }
    }
}

/// Whole amounts of `cost` owed at `fraction`, less what is already paid.
fn owed_at(cost: &ResourceCost, fraction: Fixed, paid: &ResourceCost) -> ResourceCost {
    cost.iter()
        .filter_map(|(resource, &amount)| {
            let due = (Fixed::from_num(amount) * fraction.min(Fixed::ONE))
                .floor()
                .to_num::<u32>();
            let already = paid.get(resource).copied().unwrap_or(0);
            (due > already).then(|| (resource.clone(), due - already))
        })
        .collect()
}

fn add_paid(paid: &mut ResourceCost, payment: &ResourceCost) {
    for (resource, amount) in payment {
        *paid.entry(resource.clone()).or_default() += amount;
    }
}

fn stall(world: &mut World, unit: &mut Unit, target: EntityId) -> Outcome {
    if unit.task.stalled_ticks == 0 {
        world.events.emit(GameEvent::ActionStalled {
            unit: unit.id,
            target,
        });
    }
    unit.task.stalled_ticks += 1;
    if unit.task.stalled_ticks > world.settings.stall_grace_ticks {
        Outcome::Failed(CommandError::InsufficientResources)
    } else {
        Outcome::Continue
    }
}

/// Advance construction of an unbuilt site.
///
/// The cost is paid as progress is made, so a builder can stall halfway
/// when the owner runs dry and resumes once funds return.
fn construct(world: &mut World, unit: &mut Unit, site_id: EntityId, speed: Fixed) -> Outcome {
    let Some(site) = world.entities.building(site_id) else {
        return Outcome::Done;
    };
    if !site.is_alive() || site.built {
        return Outcome::Done;
    }
    let approach = Approach::footprint(site.cell, site.footprint, INTERACT_RANGE);
    let old = site.build_progress;
    let max_health = site.health.max;
    let paid = site.construction_paid.clone();
    let catalog = Arc::clone(&world.catalog);
    let Some(template) = catalog.building(&site.building_type) else {
        return Outcome::Failed(CommandError::InvalidTarget);
    };
    if let Some(outcome) = approach_phase(world, unit, &approach) {
        return outcome;
    }
    unit.state = UnitState::Building { target: site_id };
    unit.velocity = Vec2Fixed::ZERO;

    let step = if template.build_time <= Fixed::ZERO {
        Fixed::ONE
    } else {
        world.dt() * speed / template.build_time
    };
    let progress = (old + step).min(Fixed::ONE);
    let payment = owed_at(&template.cost, progress, &paid);
    if !payment.is_empty()
        && world
            .ledger
            .debit(unit.player, &payment, ChangeReason::Construction, &mut world.events)
            .is_err()
    {
        return stall(world, unit, site_id);
    }
    unit.task.stalled_ticks = 0;

    let max = Fixed::from_num(max_health);
    let gain = (max * progress).floor().to_num::<u32>() - (max * old).floor().to_num::<u32>();
    let Some(site) = world.entities.building_mut(site_id) else {
        return Outcome::Done;
    };
    add_paid(&mut site.construction_paid, &payment);
    site.health.heal(gain);
    site.build_progress = progress;
    if progress < Fixed::ONE {
        return Outcome::Continue;
    }

    site.built = true;
    let player = site.player;
    info!(building = site_id, building_type = %site.building_type, "construction complete");
    world.events.emit(GameEvent::BuildingCompleted {
        building: site_id,
        player,
    });
    Outcome::Done
}

fn repair(world: &mut World, unit: &mut Unit, target: EntityId) -> Outcome {
    let Some(building) = world.entities.building(target) else {
        return Outcome::Done;
    };
    if !building.is_alive() {
        return Outcome::Done;
    }
    let speed = build_speed(world, unit).unwrap_or(Fixed::ONE);
    if !building.built {
        return construct(world, unit, target, speed);
    }
    if building.health.is_full() {
        return Outcome::Done;
    }

    let approach = Approach::footprint(building.cell, building.footprint, INTERACT_RANGE);
    let (current, max) = (building.health.current, building.health.max);
    let catalog = Arc::clone(&world.catalog);
    let Some(template) = catalog.building(&building.building_type) else {
        return Outcome::Failed(CommandError::InvalidTarget);
    };
    if let Some(outcome) = approach_phase(world, unit, &approach) {
        return outcome;
    }
    unit.state = UnitState::Repairing { target };
    unit.velocity = Vec2Fixed::ZERO;

    let rate = catalog
        .unit(&unit.unit_type)
        .and_then(|t| t.repair.as_ref())
        .map(|r| r.rate)
        .or_else(|| {
            (template.build_time > Fixed::ZERO)
                .then(|| Fixed::from_num(max) / template.build_time * speed)
        })
        .unwrap_or_else(|| Fixed::from_num(max));
    let carry = unit.task.repair_carry + rate * world.dt();
    let whole = carry.floor().to_num::<u32>().min(max - current);
    if whole == 0 {
        unit.task.repair_carry = carry;
        return Outcome::Continue;
    }

    let total = unit.task.repair_total + whole;
    let fraction = Fixed::from_num(total) / Fixed::from_num(max);
    let payment = owed_at(&template.cost, fraction, &unit.task.repair_paid);
    if !payment.is_empty()
        && world
            .ledger
            .debit(unit.player, &payment, ChangeReason::Repair, &mut world.events)
            .is_err()
    {
        return stall(world, unit, target);
    }
    unit.task.stalled_ticks = 0;
    unit.task.repair_carry = carry - carry.floor();
    unit.task.repair_total = total;
    add_paid(&mut unit.task.repair_paid, &payment);

    let Some(building) = world.entities.building_mut(target) else {
        return Outcome::Done;
    };
    building.health.heal(whole);
    if building.health.is_full() {
        Outcome::Done
    } else {
        Outcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(ARRIVAL_EPSILON, Fixed::from_num(1) / Fixed::from_num(256));
        assert_eq!(INTERACT_RANGE, Fixed::from_num(1.5));
        assert_eq!(FOLLOW_DISTANCE, Fixed::from_num(2));
        assert_eq!(GUARD_LEASH, Fixed::from_num(3));
    }

    #[test]
    fn test_footprint_approach_covers_its_cells() {
        let approach = Approach::footprint((4, 4), (2, 2), INTERACT_RANGE);
        assert!(approach.covers((4, 4)));
        assert!(approach.covers((5, 5)));
        assert!(!approach.covers((6, 5)));
        assert!(approach.reached(Vec2Fixed::from_cell((7, 5))));
        assert!(!approach.reached(Vec2Fixed::from_cell((8, 5))));
    }

    #[test]
    fn test_point_approach_never_covers_blocked_cells() {
        let approach = Approach::point(Vec2Fixed::from_cell((3, 3)));
        assert!(!approach.covers((3, 3)));
        assert!(approach.reached(Vec2Fixed::from_cell((3, 3))));
    }

    #[test]
    fn test_owed_at_pays_whole_units_only() {
        let cost = ResourceCost::from([("gold".to_string(), 100), ("wood".to_string(), 3)]);
        let paid = ResourceCost::new();
        let owed = owed_at(&cost, Fixed::from_num(0.25), &paid);
        assert_eq!(owed.get("gold"), Some(&25));
        assert_eq!(owed.get("wood"), None);

        let paid = ResourceCost::from([("gold".to_string(), 25)]);
        let owed = owed_at(&cost, Fixed::ONE, &paid);
        assert_eq!(owed.get("gold"), Some(&75));
        assert_eq!(owed.get("wood"), Some(&3));
    }
}
