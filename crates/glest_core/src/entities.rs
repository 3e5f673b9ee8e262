//! Entity tables with per-player and spatial indexes.
//!
//! Tables are ordered by ID, so iteration is always ascending and never
//! depends on hashing. IDs are handed out monotonically and never reused.

use std::collections::{BTreeMap, BTreeSet};

use crate::building::Building;
use crate::math::{Fixed, Vec2Fixed};
use crate::unit::Unit;
use crate::{EntityId, PlayerId};

/// Side length, in cells, of a spatial hash bucket.
pub const SPATIAL_BLOCK: i32 = 8;

type Block = (i32, i32);

fn block_of(position: Vec2Fixed) -> Block {
    let (x, y) = position.cell();
    (x.div_euclid(SPATIAL_BLOCK), y.div_euclid(SPATIAL_BLOCK))
}

/// Coarse grid of ID sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
struct SpatialHash {
    buckets: BTreeMap<Block, BTreeSet<EntityId>>,
    located: BTreeMap<EntityId, Block>,
    /// Cells between an indexed centre and the farthest edge it stands for.
    margin: i32,
}

impl SpatialHash {
    fn insert(&mut self, id: EntityId, position: Vec2Fixed) {
        self.remove(id);
        let block = block_of(position);
        self.buckets.entry(block).or_default().insert(id);
        self.located.insert(id, block);
    }

    /// Account for a footprint whose centre is indexed.
    fn widen(&mut self, (w, h): (u32, u32)) {
        let half = i32::try_from(w.max(h).div_ceil(2)).unwrap_or(i32::MAX);
        self.margin = self.margin.max(half.saturating_add(1));
    }

    fn remove(&mut self, id: EntityId) {
        if let Some(block) = self.located.remove(&id) {
            if let Some(bucket) = self.buckets.get_mut(&block) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(&block);
                }
            }
        }
    }

    fn update(&mut self, id: EntityId, position: Vec2Fixed) {
        if self.located.get(&id) != Some(&block_of(position)) {
            self.insert(id, position);
        }
    }

    fn candidates(&self, center: Vec2Fixed, radius: Fixed) -> BTreeSet<EntityId> {
        let reach = radius.ceil().saturating_to_num::<i32>().saturating_add(self.margin);
        let (cx, cy) = center.cell();
        let (bx0, by0) = ((cx - reach).div_euclid(SPATIAL_BLOCK), (cy - reach).div_euclid(SPATIAL_BLOCK));
        let (bx1, by1) = ((cx + reach).div_euclid(SPATIAL_BLOCK), (cy + reach).div_euclid(SPATIAL_BLOCK));
        self.buckets
            .range((bx0, by0)..=(bx1, by1))
            .filter(|((bx, by), _)| (bx0..=bx1).contains(bx) && (by0..=by1).contains(by))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }
}

/// Owner of every unit and building.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityManager {
    next_id: EntityId,
    units: BTreeMap<EntityId, Unit>,
    buildings: BTreeMap<EntityId, Building>,
    by_player: BTreeMap<PlayerId, BTreeSet<EntityId>>,
    spatial: SpatialHash,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self {
            next_id: 1,
            units: BTreeMap::new(),
            buildings: BTreeMap::new(),
            by_player: BTreeMap::new(),
            spatial: SpatialHash::default(),
        }
    }
}

impl EntityManager {
    /// Create an empty manager. The first ID handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next ID.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Next ID that would be handed out.
    #[must_use]
    pub const fn peek_next_id(&self) -> EntityId {
        self.next_id
    }

    /// Register a unit.
    pub fn insert_unit(&mut self, unit: Unit) {
        self.by_player.entry(unit.player).or_default().insert(unit.id);
        self.spatial.insert(unit.id, unit.position);
        self.units.insert(unit.id, unit);
    }

    /// Register a building.
    pub fn insert_building(&mut self, building: Building) {
        self.by_player
            .entry(building.player)
            .or_default()
            .insert(building.id);
        self.spatial.widen(building.footprint);
        self.spatial.insert(building.id, building.center());
        self.buildings.insert(building.id, building);
    }

    /// Drop an entity from every index.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let player = if let Some(unit) = self.units.remove(&id) {
            unit.player
        } else if let Some(building) = self.buildings.remove(&id) {
            building.player
        } else {
            return false;
        };
        if let Some(owned) = self.by_player.get_mut(&player) {
            owned.remove(&id);
        }
        self.spatial.remove(id);
        true
    }

    /// Whether an ID names a unit or building.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.units.contains_key(&id) || self.buildings.contains_key(&id)
    }

    /// Look up a unit.
    #[must_use]
    pub fn unit(&self, id: EntityId) -> Option<&Unit> {
        self.units.get(&id)
    }

    /// Look up a unit mutably.
    pub fn unit_mut(&mut self, id: EntityId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    /// Look up a building.
    #[must_use]
    pub fn building(&self, id: EntityId) -> Option<&Building> {
        self.buildings.get(&id)
    }

    /// Look up a building mutably.
    pub fn building_mut(&mut self, id: EntityId) -> Option<&mut Building> {
        self.buildings.get_mut(&id)
    }

    /// Units in ascending ID order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    /// Buildings in ascending ID order.
    pub fn buildings(&self) -> impl Iterator<Item = &Building> {
        self.buildings.values()
    }

    /// Unit IDs in ascending order, detached from the table.
    #[must_use]
    pub fn unit_ids(&self) -> Vec<EntityId> {
        self.units.keys().copied().collect()
    }

    /// Building IDs in ascending order, detached from the table.
    #[must_use]
    pub fn building_ids(&self) -> Vec<EntityId> {
        self.buildings.keys().copied().collect()
    }

    /// Number of units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Number of buildings.
    #[must_use]
    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    /// Everything a player owns, ascending.
    #[must_use]
    pub fn query_by_player(&self, player: PlayerId) -> Vec<EntityId> {
        self.by_player
            .get(&player)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Entities within `radius` of `center`, ascending.
    ///
    /// Units are measured from their position, buildings from the nearest
    /// point of their footprint.
    #[must_use]
    pub fn query_in_radius(&self, center: Vec2Fixed, radius: Fixed) -> Vec<EntityId> {
        let radius_sq = radius * radius;
        self.spatial
            .candidates(center, radius)
            .into_iter()
            .filter(|id| {
                if let Some(unit) = self.units.get(id) {
                    unit.position.distance_squared(center) <= radius_sq
                } else if let Some(building) = self.buildings.get(id) {
                    building.distance_to(center) <= radius
                } else {
                    false
                }
            })
            .collect()
    }

    /// Where an entity is: a unit's position or a building's centre.
    #[must_use]
    pub fn position_of(&self, id: EntityId) -> Option<Vec2Fixed> {
        self.units
            .get(&id)
            .map(|u| u.position)
            .or_else(|| self.buildings.get(&id).map(Building::center))
    }

    /// Move a unit and keep the spatial index current.
    pub fn relocate_unit(&mut self, id: EntityId, position: Vec2Fixed) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.position = position;
            self.spatial.update(id, position);
        }
    }

    /// Detach a unit so it can be advanced while the rest of the world is
    /// borrowed. Indexes keep pointing at it.
    pub(crate) fn take_unit(&mut self, id: EntityId) -> Option<Unit> {
        self.units.remove(&id)
    }

    /// Reattach a unit taken with [`EntityManager::take_unit`].
    pub(crate) fn restore_unit(&mut self, unit: Unit) {
        self.spatial.update(unit.id, unit.position);
        self.units.insert(unit.id, unit);
    }
}
