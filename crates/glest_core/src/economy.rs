//! Resource nodes, passive generation and harvest lookups.

use serde::{Deserialize, Serialize};

use crate::events::ChangeReason;
use crate::math::{CellCoord, Fixed, Vec2Fixed};
use crate::world::World;
use crate::{EntityId, PlayerId};

/// A harvestable resource deposit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Stable ID, drawn from the entity allocator.
    pub id: EntityId,
    /// Cell the node occupies.
    pub cell: CellCoord,
    /// Resource type.
    pub resource: String,
    /// Remaining amount.
    pub amount: u32,
    /// Starting amount.
    pub max_amount: u32,
}

impl ResourceNode {
    /// Whether the node is exhausted.
    #[must_use]
    pub const fn is_depleted(&self) -> bool {
        self.amount == 0
    }

    /// Anchor position of the node's cell.
    #[must_use]
    pub fn position(&self) -> Vec2Fixed {
        Vec2Fixed::from_cell(self.cell)
    }

    /// Distance from a point to the node's cell.
    #[must_use]
    pub fn distance_to(&self, point: Vec2Fixed) -> Fixed {
        let min = self.position();
        let max = Vec2Fixed::from_cell((self.cell.0 + 1, self.cell.1 + 1));
        point.distance_to_rect(min, max)
    }

    /// Take up to `amount`, returning what was actually taken.
    pub fn extract(&mut self, amount: u32) -> u32 {
        let taken = amount.min(self.amount);
        self.amount -= taken;
        taken
    }
}

/// Accumulate one tick of passive generation for a building.
///
/// Accumulators hold per-second rates summed over ticks; every whole unit
/// (a full `ticks_per_second` worth) moves into the owner's pending credit.
pub(crate) fn generation_system(world: &mut World, building_id: EntityId) {
    let tps = Fixed::from_num(world.settings.ticks_per_second);
    let Some(building) = world.entities.building_mut(building_id) else {
        return;
    };
    if !building.built || !building.is_alive() || building.generation_rates.is_empty() {
        return;
    }

    let player = building.player;
    for (resource, rate) in &building.generation_rates {
        let carry = building.generation_carry.entry(resource.clone()).or_default();
        *carry += *rate;
        let whole = (*carry / tps).floor();
        if whole > Fixed::ZERO {
            *carry -= whole * tps;
            *world
                .pending_generation
                .entry(player)
                .or_default()
                .entry(resource.clone())
                .or_default() += whole.to_num::<u32>();
        }
    }
}

/// Credit everything generated this tick, by ascending player ID.
pub(crate) fn credit_generation(world: &mut World) {
    let pending = std::mem::take(&mut world.pending_generation);
    for (player, gain) in pending {
        world
            .ledger
            .credit(player, &gain, ChangeReason::Generated, &mut world.events);
    }
}

/// Nearest built store of `player` accepting `resource`.
///
/// Ties go to the lower ID.
pub(crate) fn nearest_store(
    world: &World,
    player: PlayerId,
    resource: &str,
    from: Vec2Fixed,
) -> Option<EntityId> {
    let catalog = &world.catalog;
    world
        .entities
        .buildings()
        .filter(|b| b.player == player && b.built && b.is_alive())
        .filter(|b| {
            catalog
                .building(&b.building_type)
                .is_some_and(|t| t.stores_resource(resource))
        })
        .min_by_key(|b| (b.distance_to(from), b.id))
        .map(|b| b.id)
}

/// Nearest non-depleted node of `resource`, ties to the lower ID.
pub(crate) fn nearest_node(world: &World, resource: &str, from: Vec2Fixed) -> Option<EntityId> {
    world
        .nodes
        .values()
        .filter(|n| n.resource == resource && !n.is_depleted())
        .min_by_key(|n| (n.distance_to(from), n.id))
        .map(|n| n.id)
}
