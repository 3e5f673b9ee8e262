//! Test fixtures and helpers.
//!
//! A small "magitech" tech tree plus builders for worlds and entities, so
//! every test starts from the same data.

use std::collections::BTreeMap;
use std::sync::Arc;

use fixed::types::I32F32;
use glest_core::catalog::{Catalog, TechTreeData};
use glest_core::command::{Command, CommandSubmission};
use glest_core::config::GameConfig;
use glest_core::events::GameEvent;
use glest_core::ledger::ResourceCost;
use glest_core::map::MapData;
use glest_core::math::{CellCoord, Vec2Fixed};
use glest_core::simulation::Simulation;
use glest_core::world::CreateOptions;
use glest_core::{EntityId, PlayerId};

/// Sample tech tree used across the test suites.
///
/// - `initiate` costs gold and energy; `worker` costs gold only
/// - `archer` hits with piercing (×1.5 against leather); `swordman` wears
///   leather with 2 armor and 150 HP
/// - `scout` moves one cell per tick at 60 ticks per second
/// - `mage_tower` stores, produces, researches and upgrades
/// - `energy_source` generates energy
pub const SAMPLE_TECH_TREE: &str = r#"TechTreeData(
    name: "magitech",
    resources: [
        ResourceDefinition(name: "gold"),
        ResourceDefinition(name: "wood"),
        ResourceDefinition(name: "energy", harvestable: false),
    ],
    attack_types: ["piercing", "slashing", "magic"],
    armor_types: ["leather", "plate", "stone"],
    damage_multipliers: [
        DamageMultiplier(attack: "piercing", armor: "leather", percent: 150),
        DamageMultiplier(attack: "piercing", armor: "stone", percent: 25),
        DamageMultiplier(attack: "slashing", armor: "stone", percent: 50),
        DamageMultiplier(attack: "magic", armor: "plate", percent: 200),
    ],
    factions: [
        FactionDefinition(
            name: "magic",
            starting_resources: { "gold": 100, "wood": 50 },
        ),
        FactionDefinition(
            name: "tech",
            starting_resources: { "gold": 1000, "wood": 500 },
            starting_buildings: [StartingEntity(template: "mage_tower")],
            starting_units: [
                StartingEntity(template: "worker", offset: (3, 0)),
                StartingEntity(template: "worker", offset: (3, 1)),
                StartingEntity(template: "archer", offset: (0, 3)),
            ],
            ai_hints: ["turtle"],
        ),
    ],
    units: [
        UnitTemplate(
            name: "initiate",
            max_health: 100,
            armor_type: "leather",
            speed: 2.0,
            cost: { "gold": 75, "energy": 1 },
            production_time: 1.0,
            attack: Some(AttackSkill(attack_type: "magic", strength: 8, range: 4.0, cooldown: 1.0)),
            tags: ["caster"],
        ),
        UnitTemplate(
            name: "worker",
            max_health: 80,
            armor_type: "leather",
            speed: 2.0,
            cost: { "gold": 75 },
            production_time: 1.0,
            harvest: Some(HarvestSkill(resources: ["gold", "wood"], capacity: 10, rate: 2.0)),
            build: Some(BuildSkill(buildings: ["mage_tower", "energy_source"])),
            repair: Some(RepairSkill(rate: 10.0)),
            tags: ["worker"],
        ),
        UnitTemplate(
            name: "archer",
            max_health: 150,
            armor: 2,
            armor_type: "leather",
            speed: 2.0,
            sight: 10,
            cost: { "gold": 100, "wood": 25 },
            production_time: 2.0,
            attack: Some(AttackSkill(attack_type: "piercing", strength: 10, range: 5.0, cooldown: 1.0)),
            tags: ["ranged"],
        ),
        UnitTemplate(
            name: "swordman",
            max_health: 150,
            armor: 2,
            armor_type: "leather",
            speed: 2.0,
            cost: { "gold": 90 },
            production_time: 2.0,
            attack: Some(AttackSkill(attack_type: "slashing", strength: 12, range: 1.5, cooldown: 1.0)),
            tags: ["melee"],
        ),
        UnitTemplate(
            name: "scout",
            max_health: 60,
            armor_type: "leather",
            speed: 60.0,
            cost: { "gold": 40 },
            production_time: 1.0,
        ),
        UnitTemplate(
            name: "wisp",
            max_health: 40,
            armor_type: "plate",
            speed: 4.0,
            fields: [Air],
            cost: { "energy": 5 },
            production_time: 1.0,
            requires: ["arcane_flight"],
        ),
    ],
    buildings: [
        BuildingTemplate(
            name: "mage_tower",
            max_health: 1000,
            armor: 5,
            armor_type: "stone",
            footprint: (2, 2),
            cost: { "gold": 200, "wood": 100 },
            build_time: 10.0,
            produces: ["initiate", "worker", "archer", "swordman", "scout", "wisp"],
            researches: ["improved_bows", "arcane_flight"],
            stores: ["gold", "wood"],
            upgrade: Some(UpgradeSkill(
                max_level: 2,
                cost: { "gold": 50 },
                duration: 5.0,
                health_bonus_percent: 10,
                production_speed_percent: 25,
            )),
        ),
        BuildingTemplate(
            name: "energy_source",
            max_health: 300,
            armor_type: "stone",
            cost: { "gold": 50 },
            build_time: 4.0,
            generates: [Generation(resource: "energy", per_second: 1.0)],
        ),
    ],
    technologies: [
        TechDefinition(
            name: "improved_bows",
            cost: { "gold": 150, "wood": 100 },
            research_time: 3.0,
            effects: [
                TechEffect(
                    effect_type: StatModifierPercent(stat: AttackStrength, percent: 20),
                    applies_to_tags: ["ranged"],
                ),
            ],
        ),
        TechDefinition(
            name: "arcane_flight",
            cost: { "gold": 100 },
            research_time: 2.0,
            prerequisites: ["improved_bows"],
        ),
    ],
)"#;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Position of a cell's anchor corner.
#[must_use]
pub fn cell_pos(x: i32, y: i32) -> Vec2Fixed {
    Vec2Fixed::from_cell((x, y))
}

/// Build a resource cost from pairs.
#[must_use]
pub fn cost(entries: &[(&str, u32)]) -> ResourceCost {
    entries.iter().map(|&(r, a)| (r.to_string(), a)).collect()
}

/// The sample tech tree as data, for tests that tweak it before indexing.
///
/// # Panics
///
/// Panics if [`SAMPLE_TECH_TREE`] does not parse.
#[must_use]
pub fn sample_tree() -> TechTreeData {
    ron::from_str(SAMPLE_TECH_TREE).expect("sample tech tree parses")
}

/// The sample tech tree, indexed.
///
/// # Panics
///
/// Panics if the sample tree fails validation.
#[must_use]
pub fn sample_catalog() -> Arc<Catalog> {
    Arc::new(Catalog::from_data(sample_tree()).expect("sample tech tree is consistent"))
}

/// Flat open map with one start position per player along the diagonal.
#[must_use]
pub fn open_config(width: u32, height: u32, factions: &[(PlayerId, &str)]) -> GameConfig {
    let starts = (0..factions.len() as u32)
        .map(|i| {
            let step = (width.min(height) / (factions.len() as u32 + 1)).max(1);
            (step * (i + 1), step * (i + 1))
        })
        .collect();
    let players: BTreeMap<PlayerId, String> = factions
        .iter()
        .map(|&(id, faction)| (id, faction.to_string()))
        .collect();
    GameConfig::new(players, MapData::open(width, height, starts))
}

/// Two "magic" players (1 and 2) on an empty open map.
#[must_use]
pub fn two_player_config(width: u32, height: u32) -> GameConfig {
    open_config(width, height, &[(1, "magic"), (2, "magic")])
}

/// Simulation over the sample catalog.
///
/// # Panics
///
/// Panics if the world cannot be built.
#[must_use]
pub fn simulation(config: &GameConfig) -> Simulation {
    Simulation::new(config, sample_catalog()).expect("fixture world builds")
}

/// Two-player simulation on an empty `width × height` map.
#[must_use]
pub fn empty_simulation(width: u32, height: u32) -> Simulation {
    simulation(&two_player_config(width, height))
}

/// Place a free unit at a cell's anchor corner.
///
/// # Panics
///
/// Panics if the unit cannot be created there.
pub fn spawn_unit(sim: &mut Simulation, player: PlayerId, unit_type: &str, cell: CellCoord) -> EntityId {
    sim.world_mut()
        .create_unit(player, unit_type, Vec2Fixed::from_cell(cell), CreateOptions::free())
        .unwrap_or_else(|e| panic!("cannot spawn {unit_type} at {cell:?}: {e}"))
}

/// Place a finished building.
///
/// # Panics
///
/// Panics if the building cannot be created there.
pub fn spawn_building(
    sim: &mut Simulation,
    player: PlayerId,
    building_type: &str,
    cell: CellCoord,
) -> EntityId {
    sim.world_mut()
        .create_building(player, building_type, cell, CreateOptions::free())
        .unwrap_or_else(|e| panic!("cannot place {building_type} at {cell:?}: {e}"))
}

/// Place an unpaid construction site.
///
/// # Panics
///
/// Panics if the site cannot be created there.
pub fn spawn_site(
    sim: &mut Simulation,
    player: PlayerId,
    building_type: &str,
    cell: CellCoord,
) -> EntityId {
    sim.world_mut()
        .create_building(player, building_type, cell, CreateOptions::site())
        .unwrap_or_else(|e| panic!("cannot place site {building_type} at {cell:?}: {e}"))
}

/// Replace a player's balances with exactly `balances`.
///
/// # Panics
///
/// Panics for an unknown player.
pub fn set_resources(sim: &mut Simulation, player: PlayerId, balances: &[(&str, u32)]) {
    let world = sim.world_mut();
    let current = world.resources(player);
    world
        .deduct_resources(player, &current)
        .expect("a player can always pay their own balance");
    world
        .add_resources(player, &cost(balances))
        .expect("player exists");
}

/// Non-queued submission for one entity.
#[must_use]
pub fn order(player: PlayerId, entity: EntityId, command: Command) -> CommandSubmission {
    CommandSubmission::new(player, entity, command)
}

/// Run `n` ticks and collect every flushed event.
pub fn run_ticks(sim: &mut Simulation, n: u64) -> Vec<GameEvent> {
    let mut events = Vec::new();
    for _ in 0..n {
        events.extend(sim.tick());
    }
    events
}

/// Run until `done` holds or `limit` ticks pass; returns the ticks run.
pub fn run_until<F>(sim: &mut Simulation, limit: u64, mut done: F) -> u64
where
    F: FnMut(&Simulation) -> bool,
{
    for ran in 0..limit {
        if done(sim) {
            return ran;
        }
        sim.tick();
    }
    limit
}
