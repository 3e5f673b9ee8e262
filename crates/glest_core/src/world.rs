//! World state: the single owner of map, players, nodes and entities.
//!
//! Everything the tick mutates lives here. Systems receive `&mut World`
//! one at a time; nothing else holds a reference across a tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::behavior;
use crate::building::{Building, Lifecycle};
use crate::catalog::{Catalog, Field, Layer};
use crate::command::CommandQueue;
use crate::config::GameConfig;
use crate::economy::{self, ResourceNode};
use crate::entities::EntityManager;
use crate::error::{CreateError, GameError, InsufficientResources, Result};
use crate::events::{ChangeReason, EntityKind, EventBus, GameEvent, ProductionFailure};
use crate::ledger::{ResourceCost, ResourceLedger};
use crate::map::GameMap;
use crate::math::{seconds_to_ticks, CellCoord, Fixed, Vec2Fixed};
use crate::player::Player;
use crate::production::{self, ProductionItem};
use crate::unit::{Health, Unit, UnitState, UnitStats};
use crate::{EntityId, PlayerId};

/// How far from its start cell a starting unit may be nudged.
const START_PLACEMENT_RADIUS: i32 = 6;

/// `amount × multiplier`, floored; `None` when it does not fit.
fn scale_endowment(amount: u32, multiplier: Fixed) -> Option<u32> {
    Fixed::checked_from_num(amount)?
        .checked_mul(multiplier)?
        .checked_floor()?
        .checked_to_num::<u32>()
}

/// Per-game constants derived from [`GameConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorldSettings {
    /// Simulation rate.
    pub ticks_per_second: u32,
    /// Seconds per tick.
    pub dt: Fixed,
    /// Scales starting endowments and gather rates.
    pub resource_multiplier: Fixed,
    /// Default production queue depth.
    pub max_production_queue: usize,
    /// Ticks a stalled build or repair waits for funds.
    pub stall_grace_ticks: u64,
}

impl WorldSettings {
    /// Derive settings from a configuration.
    #[must_use]
    pub fn from_config(config: &GameConfig) -> Self {
        let ticks_per_second = config.ticks_per_second.max(1);
        Self {
            ticks_per_second,
            dt: config.dt(),
            resource_multiplier: config.resource_multiplier,
            max_production_queue: config.max_production_queue,
            stall_grace_ticks: seconds_to_ticks(config.stall_grace_seconds, ticks_per_second),
        }
    }
}

/// Options for [`World::create_unit`] and [`World::create_building`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Debit the template cost from the owner.
    pub charge: bool,
    /// Buildings only: create finished instead of as a construction site.
    pub built: bool,
}

impl CreateOptions {
    /// Free and finished.
    #[must_use]
    pub const fn free() -> Self {
        Self {
            charge: false,
            built: true,
        }
    }

    /// Paid and finished.
    #[must_use]
    pub const fn charged() -> Self {
        Self {
            charge: true,
            built: true,
        }
    }

    /// Unpaid construction site; builders pay as they work.
    #[must_use]
    pub const fn site() -> Self {
        Self {
            charge: false,
            built: false,
        }
    }
}

/// The authoritative game state.
#[derive(Debug)]
pub struct World {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) settings: WorldSettings,
    pub(crate) tick: u64,
    pub(crate) map: GameMap,
    pub(crate) players: BTreeMap<PlayerId, Player>,
    pub(crate) nodes: BTreeMap<EntityId, ResourceNode>,
    pub(crate) entities: EntityManager,
    pub(crate) ledger: ResourceLedger,
    pub(crate) events: EventBus,
    pub(crate) pending_generation: BTreeMap<PlayerId, ResourceCost>,
}

impl World {
    /// Build the starting world: map, resource nodes, players with their
    /// endowment, and each faction's starting buildings and units.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, unknown factions or resources, and
    /// starting entities that cannot be placed.
    pub fn new(config: &GameConfig, catalog: Arc<Catalog>) -> Result<Self> {
        config.validate()?;
        let map = GameMap::from_data(&config.map)?;
        let mut world = Self {
            catalog: Arc::clone(&catalog),
            settings: WorldSettings::from_config(config),
            tick: 0,
            map,
            players: BTreeMap::new(),
            nodes: BTreeMap::new(),
            entities: EntityManager::new(),
            ledger: ResourceLedger::new(),
            events: EventBus::new(),
            pending_generation: BTreeMap::new(),
        };

        for placement in &config.map.resources {
            let (x, y) = placement.cell;
            world
                .add_resource_node(&placement.resource, (x as i32, y as i32), placement.amount)
                .map_err(|e| match e {
                    CreateError::UnknownType(name) => GameError::UnknownTemplate {
                        name,
                        referenced_by: "map resources".into(),
                    },
                    other => GameError::Create(other),
                })?;
        }

        for (index, (&player_id, faction_name)) in config.player_factions.iter().enumerate() {
            let faction = catalog
                .faction(faction_name)
                .ok_or_else(|| GameError::UnknownTemplate {
                    name: faction_name.clone(),
                    referenced_by: format!("player {player_id}"),
                })?;
            let &(sx, sy) = config.map.start_positions.get(index).ok_or_else(|| {
                GameError::InvalidConfig(format!("no start position for player {player_id}"))
            })?;
            let start = (sx as i32, sy as i32);
            let is_ai = config.ai_players.contains(&player_id);
            world
                .players
                .insert(player_id, Player::new(player_id, faction_name, is_ai, index, start));
            world.ledger.open_account(player_id);

            let endowment = faction
                .starting_resources
                .iter()
                .map(|(r, &a)| {
                    scale_endowment(a, config.resource_multiplier)
                        .map(|scaled| (r.clone(), scaled))
                        .ok_or_else(|| {
                            GameError::InvalidConfig(format!(
                                "starting {r} for player {player_id} overflows at multiplier {}",
                                config.resource_multiplier
                            ))
                        })
                })
                .collect::<Result<ResourceCost>>()?;
            world
                .ledger
                .credit(player_id, &endowment, ChangeReason::Initial, &mut world.events);
        }

        for (&player_id, faction_name) in &config.player_factions {
            let Some(faction) = catalog.faction(faction_name) else {
                continue;
            };
            let Some(start) = world.players.get(&player_id).map(|p| p.start_cell) else {
                continue;
            };
            for entry in &faction.starting_buildings {
                let cell = (start.0 + entry.offset.0, start.1 + entry.offset.1);
                world.create_building(player_id, &entry.template, cell, CreateOptions::free())?;
            }
            for entry in &faction.starting_units {
                let fields = catalog
                    .unit(&entry.template)
                    .ok_or_else(|| CreateError::UnknownType(entry.template.clone()))?
                    .fields
                    .clone();
                let wanted = (start.0 + entry.offset.0, start.1 + entry.offset.1);
                let cell = world
                    .nearest_free_cell(wanted, &fields, START_PLACEMENT_RADIUS)
                    .ok_or(CreateError::NoSpace)?;
                world.create_unit(
                    player_id,
                    &entry.template,
                    Vec2Fixed::from_cell(cell),
                    CreateOptions::free(),
                )?;
            }
        }

        tracing::info!(
            tech_tree = catalog.name(),
            players = world.players.len(),
            units = world.entities.unit_count(),
            buildings = world.entities.building_count(),
            nodes = world.nodes.len(),
            "world initialised"
        );
        Ok(world)
    }

    /// Current tick.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Seconds per tick.
    #[must_use]
    pub fn dt(&self) -> Fixed {
        self.settings.dt
    }

    /// Elapsed game time in seconds.
    #[must_use]
    pub fn game_seconds(&self) -> Fixed {
        Fixed::from_num(self.tick) * self.settings.dt
    }

    /// Per-game constants.
    #[must_use]
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Asset catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The grid.
    #[must_use]
    pub fn map(&self) -> &GameMap {
        &self.map
    }

    /// Players by ID.
    #[must_use]
    pub fn players(&self) -> &BTreeMap<PlayerId, Player> {
        &self.players
    }

    /// Look up a player.
    #[must_use]
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    /// Resource nodes by ID.
    #[must_use]
    pub fn nodes(&self) -> &BTreeMap<EntityId, ResourceNode> {
        &self.nodes
    }

    /// Look up a resource node.
    #[must_use]
    pub fn node(&self, id: EntityId) -> Option<&ResourceNode> {
        self.nodes.get(&id)
    }

    /// Units and buildings.
    #[must_use]
    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    /// Look up a unit.
    #[must_use]
    pub fn unit(&self, id: EntityId) -> Option<&Unit> {
        self.entities.unit(id)
    }

    /// Look up a building.
    #[must_use]
    pub fn building(&self, id: EntityId) -> Option<&Building> {
        self.entities.building(id)
    }

    /// Resource accounts.
    #[must_use]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Copy of a player's account.
    #[must_use]
    pub fn resources(&self, player: PlayerId) -> ResourceCost {
        self.ledger.snapshot(player)
    }

    /// Events emitted since the last flush.
    #[must_use]
    pub fn pending_events(&self) -> &[GameEvent] {
        self.events.pending()
    }

    /// Whether two players are enemies.
    #[must_use]
    pub fn are_enemies(&self, a: PlayerId, b: PlayerId) -> bool {
        match (self.players.get(&a), self.players.get(&b)) {
            (Some(a), Some(b)) => a.team != b.team,
            _ => false,
        }
    }

    /// Credit resources to a player.
    ///
    /// # Errors
    ///
    /// [`GameError::InvalidPlayer`] for an unknown player.
    pub fn add_resources(&mut self, player: PlayerId, gain: &ResourceCost) -> Result<()> {
        if !self.players.contains_key(&player) {
            return Err(GameError::InvalidPlayer(player));
        }
        self.ledger
            .credit(player, gain, ChangeReason::Adjustment, &mut self.events);
        Ok(())
    }

    /// Debit resources from a player, all or nothing.
    ///
    /// # Errors
    ///
    /// The shortfall if the player cannot pay; nothing is deducted.
    pub fn deduct_resources(
        &mut self,
        player: PlayerId,
        cost: &ResourceCost,
    ) -> std::result::Result<(), InsufficientResources> {
        self.ledger
            .debit(player, cost, ChangeReason::Adjustment, &mut self.events)
    }

    /// Place a resource node.
    ///
    /// # Errors
    ///
    /// Unknown resource, off-map cell, or a cell already holding a node or
    /// an occupant.
    pub fn add_resource_node(
        &mut self,
        resource: &str,
        cell: CellCoord,
        amount: u32,
    ) -> std::result::Result<EntityId, CreateError> {
        if !self.catalog.has_resource(resource) {
            return Err(CreateError::UnknownType(resource.to_string()));
        }
        if !self.map.in_bounds(cell) {
            return Err(CreateError::OffMap);
        }
        if self.map.resource_at(cell).is_some() || self.map.occupant(cell, Layer::Ground).is_some() {
            return Err(CreateError::NoSpace);
        }
        let id = self.entities.allocate_id();
        self.nodes.insert(
            id,
            ResourceNode {
                id,
                cell,
                resource: resource.to_string(),
                amount,
                max_amount: amount,
            },
        );
        self.map.set_resource(cell, Some(id));
        Ok(id)
    }

    /// Create a unit from its template.
    ///
    /// Stats are resolved against the owner's researched technologies.
    ///
    /// # Errors
    ///
    /// See [`CreateError`]; nothing changes on failure.
    pub fn create_unit(
        &mut self,
        player: PlayerId,
        unit_type: &str,
        position: Vec2Fixed,
        options: CreateOptions,
    ) -> std::result::Result<EntityId, CreateError> {
        let Some(owner) = self.players.get(&player) else {
            return Err(CreateError::InvalidPlayer(player));
        };
        let applied_techs: Vec<String> = owner.technologies.iter().cloned().collect();
        let catalog = Arc::clone(&self.catalog);
        let template = catalog
            .unit(unit_type)
            .ok_or_else(|| CreateError::UnknownType(unit_type.to_string()))?;
        let cell = position.cell();
        if !self.map.in_bounds(cell) {
            return Err(CreateError::OffMap);
        }
        if !self.is_free_for(cell, &template.fields) {
            return Err(CreateError::NoSpace);
        }
        if options.charge {
            self.ledger
                .debit(player, &template.cost, ChangeReason::Production, &mut self.events)
                .map_err(|_| CreateError::ResourceInsufficient)?;
        }

        let stats = UnitStats::resolve(
            template,
            applied_techs.iter().filter_map(|t| catalog.technology(t)),
            self.settings.ticks_per_second,
        );
        let id = self.entities.allocate_id();
        let layer = template.primary_field().layer();
        self.map.occupy(cell, layer, id);
        let unit = Unit {
            id,
            player,
            unit_type: template.name.clone(),
            position,
            velocity: Vec2Fixed::ZERO,
            health: Health::new(stats.max_health),
            energy: template.max_energy,
            state: UnitState::Idle,
            commands: CommandQueue::new(),
            carried: ResourceCost::new(),
            next_attack_tick: 0,
            stats,
            applied_techs,
            fields: template.fields.clone(),
            occupied: Some(cell),
            nav: Default::default(),
            task: Default::default(),
        };
        self.entities.insert_unit(unit);
        self.events.emit(GameEvent::UnitCreated {
            unit: id,
            player,
            unit_type: template.name.clone(),
        });
        Ok(id)
    }

    /// Create a building anchored at `cell`.
    ///
    /// The whole footprint must be on the map, on land, and free.
    ///
    /// # Errors
    ///
    /// See [`CreateError`]; nothing changes on failure.
    pub fn create_building(
        &mut self,
        player: PlayerId,
        building_type: &str,
        cell: CellCoord,
        options: CreateOptions,
    ) -> std::result::Result<EntityId, CreateError> {
        if !self.players.contains_key(&player) {
            return Err(CreateError::InvalidPlayer(player));
        }
        let catalog = Arc::clone(&self.catalog);
        let template = catalog
            .building(building_type)
            .ok_or_else(|| CreateError::UnknownType(building_type.to_string()))?;
        self.check_footprint(cell, template.footprint)?;
        if options.charge {
            self.ledger
                .debit(player, &template.cost, ChangeReason::Construction, &mut self.events)
                .map_err(|_| CreateError::ResourceInsufficient)?;
        }

        let id = self.entities.allocate_id();
        let mut building = Building::from_template(
            id,
            player,
            template,
            cell,
            options.built,
            self.settings.max_production_queue,
        );
        for c in building.cells() {
            self.map.occupy(c, Layer::Ground, id);
        }
        building.occupying = true;
        if options.charge {
            building.construction_paid = template.cost.clone();
        }
        self.entities.insert_building(building);
        self.events.emit(GameEvent::BuildingCreated {
            building: id,
            player,
            building_type: template.name.clone(),
        });
        Ok(id)
    }

    /// Whether a footprint could be placed at `cell`.
    ///
    /// # Errors
    ///
    /// [`CreateError::OffMap`] or [`CreateError::NoSpace`].
    pub fn check_footprint(
        &self,
        cell: CellCoord,
        footprint: (u32, u32),
    ) -> std::result::Result<(), CreateError> {
        let (w, h) = (footprint.0.max(1) as i32, footprint.1.max(1) as i32);
        let cells = (cell.1..cell.1 + h).flat_map(|y| (cell.0..cell.0 + w).map(move |x| (x, y)));
        let mut free = true;
        for c in cells {
            if !self.map.in_bounds(c) {
                return Err(CreateError::OffMap);
            }
            free &= self.is_free_for(c, &[Field::Land]);
        }
        if free {
            Ok(())
        } else {
            Err(CreateError::NoSpace)
        }
    }

    /// Start the death of a unit or building.
    ///
    /// Health drops to zero and the entity becomes `Dying` now; occupancy is
    /// freed at the end of the tick and the entity is removed one tick later.
    /// Destroying an entity that is already dying is a no-op.
    ///
    /// # Errors
    ///
    /// [`GameError::EntityNotFound`] for an unknown ID.
    pub fn destroy(&mut self, id: EntityId) -> Result<()> {
        if let Some(unit) = self.entities.unit_mut(id) {
            if unit.state.is_alive() {
                unit.health.current = 0;
                Self::mark_unit_dying(unit, &mut self.events);
            }
            return Ok(());
        }
        if let Some(building) = self.entities.building_mut(id) {
            if building.lifecycle == Lifecycle::Alive {
                building.health.current = 0;
                self.mark_building_dying(id);
            }
            return Ok(());
        }
        Err(GameError::EntityNotFound(id))
    }

    fn mark_unit_dying(unit: &mut Unit, events: &mut EventBus) {
        unit.state = UnitState::Dying;
        unit.commands.clear();
        unit.reset_task();
        events.emit(GameEvent::UnitDying {
            entity: unit.id,
            kind: EntityKind::Unit,
            player: unit.player,
        });
    }

    fn mark_building_dying(&mut self, id: EntityId) {
        let Some(building) = self.entities.building_mut(id) else {
            return;
        };
        building.lifecycle = Lifecycle::Dying;
        let player = building.player;
        let items: Vec<ProductionItem> = building.production.drain();
        for item in items {
            production::fail_item(self, item, ProductionFailure::BuildingDestroyed);
        }
        self.events.emit(GameEvent::UnitDying {
            entity: id,
            kind: EntityKind::Building,
            player,
        });
    }

    /// Run one tick of entity updates: units, then buildings, then
    /// generation credits and the death sweep. Commands must already be
    /// dispatched; events stay buffered for the caller to flush.
    pub fn advance_tick(&mut self) {
        for id in self.entities.unit_ids() {
            behavior::update_unit(self, id);
        }
        for id in self.entities.building_ids() {
            self.update_building(id);
        }
        economy::credit_generation(self);
        self.death_sweep();
        self.collect_garbage();
        self.tick += 1;
    }

    fn update_building(&mut self, id: EntityId) {
        let Some(building) = self.entities.building_mut(id) else {
            return;
        };
        match building.lifecycle {
            Lifecycle::Dead => {}
            Lifecycle::Dying => {
                building.lifecycle = Lifecycle::Dead;
                let player = building.player;
                self.events.emit(GameEvent::UnitDied {
                    entity: id,
                    kind: EntityKind::Building,
                    player,
                });
            }
            Lifecycle::Alive => {
                production::production_system(self, id);
                economy::generation_system(self, id);
            }
        }
    }

    /// Whether a unit moving on `fields` could stand on `cell` right now.
    #[must_use]
    pub fn is_free_for(&self, cell: CellCoord, fields: &[Field]) -> bool {
        let layer = layer_of(fields);
        self.map.allows(cell, fields)
            && self.map.occupant(cell, layer).is_none()
            && (layer == Layer::Air || self.map.resource_at(cell).is_none())
    }

    /// Whether `cell` is passable for pathing on `fields`.
    ///
    /// Terrain, buildings and resource nodes block; units do not.
    #[must_use]
    pub fn is_passable(&self, cell: CellCoord, fields: &[Field]) -> bool {
        if !self.map.allows(cell, fields) {
            return false;
        }
        if layer_of(fields) == Layer::Air {
            return true;
        }
        self.map.resource_at(cell).is_none()
            && self
                .map
                .occupant(cell, Layer::Ground)
                .map_or(true, |id| self.entities.building(id).is_none())
    }

    /// Closest cell to `near` a unit on `fields` could stand on, searching
    /// rings outward up to `radius`. Ties go to row-major order.
    #[must_use]
    pub fn nearest_free_cell(
        &self,
        near: CellCoord,
        fields: &[Field],
        radius: i32,
    ) -> Option<CellCoord> {
        (0..=radius).find_map(|r| {
            (near.1 - r..=near.1 + r)
                .flat_map(|y| (near.0 - r..=near.0 + r).map(move |x| (x, y)))
                .filter(|&(x, y)| (x - near.0).abs() == r || (y - near.1).abs() == r)
                .find(|&c| self.is_free_for(c, fields))
        })
    }

    /// Mark zero-health entities as dying and free the cells of everything
    /// that is no longer alive.
    pub(crate) fn death_sweep(&mut self) {
        for id in self.entities.unit_ids() {
            let Some(unit) = self.entities.unit_mut(id) else {
                continue;
            };
            if unit.health.is_dead() && unit.state.is_alive() {
                Self::mark_unit_dying(unit, &mut self.events);
            }
            if !unit.state.is_alive() {
                if let Some(cell) = unit.occupied.take() {
                    let layer = unit.layer();
                    self.map.release(cell, layer, id);
                }
            }
        }

        for id in self.entities.building_ids() {
            let Some(building) = self.entities.building(id) else {
                continue;
            };
            if building.health.is_dead() && building.lifecycle == Lifecycle::Alive {
                self.mark_building_dying(id);
            }
            let Some(building) = self.entities.building_mut(id) else {
                continue;
            };
            if building.lifecycle != Lifecycle::Alive && building.occupying {
                building.occupying = false;
                let cells: Vec<CellCoord> = building.cells().collect();
                for cell in cells {
                    self.map.release(cell, Layer::Ground, id);
                }
            }
        }
    }

    /// Remove dead entities and depleted nodes.
    pub(crate) fn collect_garbage(&mut self) {
        let dead: Vec<EntityId> = self
            .entities
            .units()
            .filter(|u| u.state == UnitState::Dead)
            .map(|u| u.id)
            .chain(
                self.entities
                    .buildings()
                    .filter(|b| b.lifecycle == Lifecycle::Dead)
                    .map(|b| b.id),
            )
            .collect();
        for id in dead {
            self.entities.remove(id);
        }

        let depleted: Vec<(EntityId, CellCoord)> = self
            .nodes
            .values()
            .filter(|n| n.is_depleted())
            .map(|n| (n.id, n.cell))
            .collect();
        for (id, cell) in depleted {
            self.nodes.remove(&id);
            if self.map.resource_at(cell) == Some(id) {
                self.map.set_resource(cell, None);
            }
        }
    }

    /// Check the structural invariants, returning a description of every
    /// violation found.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for unit in self.entities.units() {
            if !self.players.contains_key(&unit.player) {
                problems.push(format!("unit {} owned by unknown player {}", unit.id, unit.player));
            }
            if unit.health.current > unit.health.max {
                problems.push(format!("unit {} health above max", unit.id));
            }
            let current = unit.commands.current().map(|o| &o.command);
            if !unit.state.is_consistent_with(current) {
                problems.push(format!(
                    "unit {} state {:?} inconsistent with {:?}",
                    unit.id, unit.state, current
                ));
            }
            if let Some(cell) = unit.occupied {
                if self.map.occupant(cell, unit.layer()) != Some(unit.id) {
                    problems.push(format!("unit {} does not hold its cell {:?}", unit.id, cell));
                }
            }
        }

        for building in self.entities.buildings() {
            if !self.players.contains_key(&building.player) {
                problems.push(format!(
                    "building {} owned by unknown player {}",
                    building.id, building.player
                ));
            }
            if building.health.current > building.health.max {
                problems.push(format!("building {} health above max", building.id));
            }
            if building.production.items().any(|i| i.building != building.id) {
                problems.push(format!("building {} holds a foreign production item", building.id));
            }
        }

        for y in 0..self.map.height() as i32 {
            for x in 0..self.map.width() as i32 {
                for layer in [Layer::Ground, Layer::Air] {
                    if let Some(id) = self.map.occupant((x, y), layer) {
                        if !self.entities.contains(id) {
                            problems.push(format!("cell ({x}, {y}) held by missing entity {id}"));
                        }
                    }
                }
            }
        }
        problems
    }
}

/// Occupancy layer for a field list; the first field decides.
pub(crate) fn layer_of(fields: &[Field]) -> Layer {
    fields.first().copied().unwrap_or(Field::Land).layer()
}
