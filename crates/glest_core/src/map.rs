//! Map grid: terrain, movement fields, resource slots and occupancy.
//!
//! Terrain is immutable after init. Only occupant slots and resource
//! references change while a game runs.

use serde::{Deserialize, Serialize};

use crate::catalog::{Field, Layer};
use crate::error::{GameError, Result};
use crate::math::CellCoord;
use crate::EntityId;

/// Terrain kind of a cell; decides which fields may pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Terrain {
    /// Walkable by land units, flown over by air units.
    #[default]
    Land,
    /// Sailable by water units, flown over by air units.
    Water,
    /// Impassable except by air.
    Cliff,
}

impl Terrain {
    /// Whether units of `field` may enter this terrain.
    #[must_use]
    pub const fn allows(self, field: Field) -> bool {
        match (self, field) {
            (_, Field::Air) => true,
            (Self::Land, Field::Land) => true,
            (Self::Water, Field::Water) => true,
            _ => false,
        }
    }
}

/// Rectangular terrain override in [`MapData`], inclusive on both corners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainPatch {
    /// Terrain kind.
    pub terrain: Terrain,
    /// Minimum corner.
    pub from: (u32, u32),
    /// Maximum corner.
    pub to: (u32, u32),
}

/// Resource node placed at game start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlacement {
    /// Resource type.
    pub resource: String,
    /// Cell.
    pub cell: (u32, u32),
    /// Starting (and maximum) amount.
    pub amount: u32,
}

/// Map description handed over by the map loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapData {
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Terrain overrides applied in order over all-land.
    #[serde(default)]
    pub terrain: Vec<TerrainPatch>,
    /// Row-major terrain heights; empty means flat.
    #[serde(default)]
    pub heights: Vec<i32>,
    /// Start cell per player slot, in ascending player id order.
    #[serde(default)]
    pub start_positions: Vec<(u32, u32)>,
    /// Resource nodes.
    #[serde(default)]
    pub resources: Vec<ResourcePlacement>,
}

impl MapData {
    /// Flat, open map without resources.
    #[must_use]
    pub fn open(width: u32, height: u32, start_positions: Vec<(u32, u32)>) -> Self {
        Self {
            width,
            height,
            terrain: Vec::new(),
            heights: Vec::new(),
            start_positions,
            resources: Vec::new(),
        }
    }
}

/// One grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cell {
    /// Terrain height.
    pub height: i32,
    /// Terrain kind.
    pub terrain: Terrain,
    /// Resource node occupying this cell.
    pub resource: Option<EntityId>,
    ground: Option<EntityId>,
    air: Option<EntityId>,
}

impl Cell {
    /// Occupant on a layer.
    #[must_use]
    pub const fn occupant(&self, layer: Layer) -> Option<EntityId> {
        match layer {
            Layer::Ground => self.ground,
            Layer::Air => self.air,
        }
    }

    fn slot_mut(&mut self, layer: Layer) -> &mut Option<EntityId> {
        match layer {
            Layer::Ground => &mut self.ground,
            Layer::Air => &mut self.air,
        }
    }
}

/// The world grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameMap {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl GameMap {
    /// Create an all-land, flat map.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidConfig`] for an empty map.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GameError::InvalidConfig(format!(
                "map must not be empty ({width}x{height})"
            )));
        }
        Ok(Self {
            width,
            height,
            cells: vec![Cell::default(); width as usize * height as usize],
        })
    }

    /// Build a map from loader data. Resource nodes are placed by the world.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidConfig`] if a patch, height table or
    /// start position does not fit the map.
    pub fn from_data(data: &MapData) -> Result<Self> {
        let mut map = Self::new(data.width, data.height)?;

        if !data.heights.is_empty() {
            if data.heights.len() != map.cells.len() {
                return Err(GameError::InvalidConfig(format!(
                    "height table has {} entries for {} cells",
                    data.heights.len(),
                    map.cells.len()
                )));
            }
            for (cell, &height) in map.cells.iter_mut().zip(&data.heights) {
                cell.height = height;
            }
        }

        for patch in &data.terrain {
            let (x0, y0) = patch.from;
            let (x1, y1) = patch.to;
            if x0 > x1 || y0 > y1 || x1 >= data.width || y1 >= data.height {
                return Err(GameError::InvalidConfig(format!(
                    "terrain patch {:?}..{:?} outside {}x{} map",
                    patch.from, patch.to, data.width, data.height
                )));
            }
            for y in y0..=y1 {
                for x in x0..=x1 {
                    map.set_terrain((x as i32, y as i32), patch.terrain);
                }
            }
        }

        for &(x, y) in &data.start_positions {
            if !map.in_bounds((x as i32, y as i32)) {
                return Err(GameError::InvalidConfig(format!(
                    "start position ({x}, {y}) is off the map"
                )));
            }
        }

        Ok(map)
    }

    /// Width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Check if coordinates are within grid bounds.
    #[must_use]
    pub fn in_bounds(&self, (x, y): CellCoord) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn index(&self, (x, y): CellCoord) -> Option<usize> {
        self.in_bounds((x, y))
            .then(|| y as usize * self.width as usize + x as usize)
    }

    /// Cell at coordinates, `None` off the map.
    #[must_use]
    pub fn cell(&self, coord: CellCoord) -> Option<&Cell> {
        self.index(coord).map(|i| &self.cells[i])
    }

    fn cell_mut(&mut self, coord: CellCoord) -> Option<&mut Cell> {
        self.index(coord).map(|i| &mut self.cells[i])
    }

    /// Overwrite terrain. Returns `false` off the map.
    pub fn set_terrain(&mut self, coord: CellCoord, terrain: Terrain) -> bool {
        match self.cell_mut(coord) {
            Some(cell) => {
                cell.terrain = terrain;
                true
            }
            None => false,
        }
    }

    /// Whether the terrain admits any of `fields`.
    #[must_use]
    pub fn allows(&self, coord: CellCoord, fields: &[Field]) -> bool {
        self.cell(coord)
            .is_some_and(|c| fields.iter().any(|&f| c.terrain.allows(f)))
    }

    /// Occupant of a layer.
    #[must_use]
    pub fn occupant(&self, coord: CellCoord, layer: Layer) -> Option<EntityId> {
        self.cell(coord).and_then(|c| c.occupant(layer))
    }

    /// Claim a layer slot. Fails if off the map or held by someone else.
    pub fn occupy(&mut self, coord: CellCoord, layer: Layer, id: EntityId) -> bool {
        let Some(cell) = self.cell_mut(coord) else {
            return false;
        };
        let slot = cell.slot_mut(layer);
        match *slot {
            Some(holder) if holder != id => false,
            _ => {
                *slot = Some(id);
                true
            }
        }
    }

    /// Release a layer slot if `id` holds it.
    pub fn release(&mut self, coord: CellCoord, layer: Layer, id: EntityId) {
        if let Some(cell) = self.cell_mut(coord) {
            let slot = cell.slot_mut(layer);
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    /// Resource node on a cell.
    #[must_use]
    pub fn resource_at(&self, coord: CellCoord) -> Option<EntityId> {
        self.cell(coord).and_then(|c| c.resource)
    }

    /// Attach or detach a resource node.
    pub fn set_resource(&mut self, coord: CellCoord, node: Option<EntityId>) {
        if let Some(cell) = self.cell_mut(coord) {
            cell.resource = node;
        }
    }
}
