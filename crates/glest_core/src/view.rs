//! Read-only projection of the world, committed once per tick.
//!
//! A [`WorldSnapshot`] is a plain value: readers hold an `Arc` to the last
//! committed one and never see a tick in progress.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::building::Building;
use crate::command::Command;
use crate::economy::ResourceNode;
use crate::ledger::ResourceCost;
use crate::math::{fixed_serde, CellCoord, Fixed, Vec2Fixed};
use crate::production::ProductionQueue;
use crate::unit::{Health, Unit, UnitState};
use crate::world::World;
use crate::{EntityId, PlayerId};

/// A player as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Player ID.
    pub id: PlayerId,
    /// Faction name.
    pub faction: String,
    /// AI-controlled.
    pub is_ai: bool,
    /// Team.
    pub team: u32,
    /// Display colour.
    pub color: [u8; 3],
    /// Resource balances.
    pub resources: ResourceCost,
    /// Researched technologies.
    pub technologies: BTreeSet<String>,
}

/// A unit as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitView {
    /// Unit ID.
    pub id: EntityId,
    /// Owner.
    pub player: PlayerId,
    /// Template name.
    pub unit_type: String,
    /// Position.
    pub position: Vec2Fixed,
    /// Hit points.
    pub health: Health,
    /// State machine state.
    pub state: UnitState,
    /// Current order.
    pub current_command: Option<Command>,
    /// Orders waiting behind the current one.
    pub queued_commands: usize,
    /// Resources being carried.
    pub carried: ResourceCost,
}

impl From<&Unit> for UnitView {
    fn from(unit: &Unit) -> Self {
        Self {
            id: unit.id,
            player: unit.player,
            unit_type: unit.unit_type.clone(),
            position: unit.position,
            health: unit.health,
            state: unit.state,
            current_command: unit.commands.current().map(|o| o.command.clone()),
            queued_commands: unit.commands.waiting_len(),
            carried: unit.carried.clone(),
        }
    }
}

/// A building as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingView {
    /// Building ID.
    pub id: EntityId,
    /// Owner.
    pub player: PlayerId,
    /// Template name.
    pub building_type: String,
    /// Anchor cell.
    pub cell: CellCoord,
    /// Footprint size.
    pub footprint: (u32, u32),
    /// Hit points.
    pub health: Health,
    /// Construction finished.
    pub built: bool,
    /// Construction progress in `[0, 1]`.
    #[serde(with = "fixed_serde")]
    pub build_progress: Fixed,
    /// Upgrade level.
    pub upgrade_level: u32,
    /// Production queue.
    pub production: ProductionQueue,
    /// Where produced units go.
    pub meeting_point: Option<Vec2Fixed>,
}

impl From<&Building> for BuildingView {
    fn from(building: &Building) -> Self {
        Self {
            id: building.id,
            player: building.player,
            building_type: building.building_type.clone(),
            cell: building.cell,
            footprint: building.footprint,
            health: building.health,
            built: building.built,
            build_progress: building.build_progress,
            upgrade_level: building.upgrade_level,
            production: building.production.clone(),
            meeting_point: building.meeting_point,
        }
    }
}

/// Everything collaborators may read, as of the end of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Tick this snapshot was committed at.
    pub tick: u64,
    /// Simulation rate the game time is derived from.
    pub ticks_per_second: u32,
    /// Players by ID.
    pub players: BTreeMap<PlayerId, PlayerView>,
    /// Live units by ID.
    pub units: BTreeMap<EntityId, UnitView>,
    /// Live buildings by ID.
    pub buildings: BTreeMap<EntityId, BuildingView>,
    /// Resource nodes by ID.
    pub nodes: BTreeMap<EntityId, ResourceNode>,
    /// Technologies each player could start researching now.
    pub available_techs: BTreeMap<PlayerId, Vec<String>>,
}

impl WorldSnapshot {
    /// Capture the world as it stands.
    #[must_use]
    pub fn capture(world: &World) -> Self {
        let players = world
            .players
            .values()
            .map(|p| {
                let view = PlayerView {
                    id: p.id,
                    faction: p.faction.clone(),
                    is_ai: p.is_ai,
                    team: p.team,
                    color: p.color,
                    resources: world.ledger.snapshot(p.id),
                    technologies: p.technologies.clone(),
                };
                (p.id, view)
            })
            .collect();
        let available_techs = world
            .players
            .keys()
            .map(|&id| (id, available_technologies(world, id)))
            .collect();

        Self {
            tick: world.tick,
            ticks_per_second: world.settings.ticks_per_second,
            players,
            units: world
                .entities
                .units()
                .map(|u| (u.id, UnitView::from(u)))
                .collect(),
            buildings: world
                .entities
                .buildings()
                .map(|b| (b.id, BuildingView::from(b)))
                .collect(),
            nodes: world.nodes.clone(),
            available_techs,
        }
    }

    /// Elapsed game time in seconds.
    #[must_use]
    pub fn get_game_time(&self) -> Fixed {
        if self.ticks_per_second == 0 {
            return Fixed::ZERO;
        }
        Fixed::from_num(self.tick) / Fixed::from_num(self.ticks_per_second)
    }

    /// All players, ascending ID.
    pub fn get_players(&self) -> impl Iterator<Item = &PlayerView> {
        self.players.values()
    }

    /// One player.
    #[must_use]
    pub fn get_player(&self, id: PlayerId) -> Option<&PlayerView> {
        self.players.get(&id)
    }

    /// A player's units, ascending ID.
    #[must_use]
    pub fn get_units_for_player(&self, player: PlayerId) -> Vec<&UnitView> {
        self.units.values().filter(|u| u.player == player).collect()
    }

    /// A player's buildings, ascending ID.
    #[must_use]
    pub fn get_buildings_for_player(&self, player: PlayerId) -> Vec<&BuildingView> {
        self.buildings
            .values()
            .filter(|b| b.player == player)
            .collect()
    }

    /// Resource nodes, ascending ID.
    pub fn get_resources(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// A building's production queue.
    #[must_use]
    pub fn get_production_queue(&self, building: EntityId) -> Option<&ProductionQueue> {
        self.buildings.get(&building).map(|b| &b.production)
    }

    /// Technologies the player could queue right now.
    #[must_use]
    pub fn get_available_technologies(&self, player: PlayerId) -> &[String] {
        self.available_techs
            .get(&player)
            .map_or(&[][..], Vec::as_slice)
    }
}

/// Unresearched techs with met prerequisites that one of the player's
/// finished buildings can research.
fn available_technologies(world: &World, player_id: PlayerId) -> Vec<String> {
    let Some(player) = world.players.get(&player_id) else {
        return Vec::new();
    };
    let researchable: BTreeSet<&String> = world
        .entities
        .buildings()
        .filter(|b| b.player == player_id && b.built && b.is_alive())
        .filter_map(|b| world.catalog.building(&b.building_type))
        .flat_map(|t| t.researches.iter())
        .collect();
    researchable
        .into_iter()
        .filter(|tech| !player.has_tech(tech))
        .filter(|tech| {
            world
                .catalog
                .technology(tech)
                .is_some_and(|t| player.has_all_techs(&t.prerequisites))
        })
        .cloned()
        .collect()
}

/// Last committed snapshot, shared between the writer and any readers.
#[derive(Debug, Clone, Default)]
pub struct SharedView {
    inner: Arc<RwLock<Arc<WorldSnapshot>>>,
}

impl SharedView {
    /// Start from an initial snapshot.
    #[must_use]
    pub fn new(snapshot: WorldSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Current snapshot. Cheap; holds no lock after returning.
    #[must_use]
    pub fn load(&self) -> Arc<WorldSnapshot> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Replace the snapshot in one step.
    pub fn store(&self, snapshot: WorldSnapshot) {
        let next = Arc::new(snapshot);
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }
}
