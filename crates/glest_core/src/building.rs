//! Building records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::BuildingTemplate;
use crate::ledger::ResourceCost;
use crate::math::{CellCoord, Fixed, Vec2Fixed};
use crate::production::{ProductionItem, ProductionKind, ProductionQueue};
use crate::unit::Health;
use crate::{EntityId, PlayerId};

/// Building lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Standing.
    #[default]
    Alive,
    /// Zero health; becomes `Dead` next tick.
    Dying,
    /// Removed at the end of this tick.
    Dead,
}

/// A building or construction site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Building {
    /// Stable ID.
    pub id: EntityId,
    /// Owner.
    pub player: PlayerId,
    /// Template name.
    pub building_type: String,
    /// Footprint anchor (minimum corner).
    pub cell: CellCoord,
    /// Footprint size.
    pub footprint: (u32, u32),
    /// Hit points.
    pub health: Health,
    /// Whether construction has finished.
    pub built: bool,
    /// Construction progress in `[0, 1]`.
    pub build_progress: Fixed,
    /// Production, research and upgrade queue.
    pub production: ProductionQueue,
    /// Upgrades applied so far.
    pub upgrade_level: u32,
    /// Highest reachable upgrade level.
    pub max_upgrade_level: u32,
    /// Generation per second, by resource, upgrades included.
    pub generation_rates: BTreeMap<String, Fixed>,
    /// Production speed multiplier, upgrades included.
    pub production_speed: Fixed,
    /// Where produced units walk to.
    pub meeting_point: Option<Vec2Fixed>,
    /// Lifecycle.
    pub lifecycle: Lifecycle,
    pub(crate) generation_carry: BTreeMap<String, Fixed>,
    pub(crate) construction_paid: ResourceCost,
    pub(crate) occupying: bool,
}

impl Building {
    /// New building from its template.
    ///
    /// Unbuilt sites start with one hit point; pre-built ones at full health.
    #[must_use]
    pub fn from_template(
        id: EntityId,
        player: PlayerId,
        template: &BuildingTemplate,
        cell: CellCoord,
        built: bool,
        max_queue: usize,
    ) -> Self {
        let mut health = Health::new(template.max_health.max(1));
        if !built {
            health.current = 1;
        }
        Self {
            id,
            player,
            building_type: template.name.clone(),
            cell,
            footprint: (template.footprint.0.max(1), template.footprint.1.max(1)),
            health,
            built,
            build_progress: if built { Fixed::ONE } else { Fixed::ZERO },
            production: ProductionQueue::new(template.max_queue.unwrap_or(max_queue)),
            upgrade_level: 0,
            max_upgrade_level: template.max_upgrade_level(),
            generation_rates: template
                .generates
                .iter()
                .map(|g| (g.resource.clone(), g.per_second))
                .collect(),
            production_speed: template.production_speed,
            meeting_point: None,
            lifecycle: Lifecycle::Alive,
            generation_carry: BTreeMap::new(),
            construction_paid: ResourceCost::new(),
            occupying: false,
        }
    }

    /// Footprint cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellCoord> {
        let (x0, y0) = self.cell;
        let (w, h) = (self.footprint.0 as i32, self.footprint.1 as i32);
        (y0..y0 + h).flat_map(move |y| (x0..x0 + w).map(move |x| (x, y)))
    }

    /// Minimum and maximum corners of the footprint in world space.
    #[must_use]
    pub fn bounds(&self) -> (Vec2Fixed, Vec2Fixed) {
        let min = Vec2Fixed::from_cell(self.cell);
        let max = Vec2Fixed::from_cell((
            self.cell.0 + self.footprint.0 as i32,
            self.cell.1 + self.footprint.1 as i32,
        ));
        (min, max)
    }

    /// Centre of the footprint.
    #[must_use]
    pub fn center(&self) -> Vec2Fixed {
        let (min, max) = self.bounds();
        let two = Fixed::from_num(2);
        Vec2Fixed::new((min.x + max.x) / two, (min.y + max.y) / two)
    }

    /// Distance from a point to the footprint edge.
    #[must_use]
    pub fn distance_to(&self, point: Vec2Fixed) -> Fixed {
        let (min, max) = self.bounds();
        point.distance_to_rect(min, max)
    }

    /// Whether the building is standing.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.lifecycle == Lifecycle::Alive && !self.health.is_dead()
    }

    /// Current item if it is an upgrade.
    #[must_use]
    pub fn current_upgrade(&self) -> Option<&ProductionItem> {
        self.production
            .current()
            .filter(|item| item.kind == ProductionKind::Upgrade)
    }

    /// Upgrades queued or in progress.
    #[must_use]
    pub fn pending_upgrades(&self) -> u32 {
        self.production
            .items()
            .filter(|item| item.kind == ProductionKind::Upgrade)
            .count() as u32
    }
}
