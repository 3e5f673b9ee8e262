//! Production system for building queues.
//!
//! A building holds one current item plus a bounded list of waiting items.
//! Costs are debited when an item is enqueued and refunded exactly on
//! cancellation or failed finalization, so queued items always account for
//! the resources taken from the player.
//!
//! Progress advances by `dt × production_speed / duration` per tick. When it
//! reaches one the item finalizes: units spawn next to the building,
//! research is recorded on the player, upgrades raise the building's level.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::command::{Command, Order};
use crate::error::{CommandError, CreateError};
use crate::events::{ChangeReason, GameEvent, ProductionFailure};
use crate::ledger::ResourceCost;
use crate::math::{fixed_serde, CellCoord, Fixed, Vec2Fixed};
use crate::world::{CreateOptions, World};
use crate::EntityId;

/// What a production item makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductionKind {
    /// A unit spawned next to the building.
    Unit,
    /// A technology for the owning player.
    Research,
    /// The building's next upgrade level.
    Upgrade,
}

/// A queued or in-progress production request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductionItem {
    /// Item kind.
    pub kind: ProductionKind,
    /// Unit template, technology, or building template for upgrades.
    pub name: String,
    /// Cost debited at enqueue.
    pub cost: ResourceCost,
    /// Duration in seconds at production speed 1.
    #[serde(with = "fixed_serde")]
    pub duration: Fixed,
    /// Tick the item became current.
    pub started_at: Option<u64>,
    /// Completion in `[0, 1]`.
    #[serde(with = "fixed_serde")]
    pub progress: Fixed,
    /// Owning building.
    pub building: EntityId,
}

impl ProductionItem {
    /// New item with no progress.
    #[must_use]
    pub fn new(
        kind: ProductionKind,
        name: &str,
        cost: ResourceCost,
        duration: Fixed,
        building: EntityId,
    ) -> Self {
        Self {
            kind,
            name: name.to_string(),
            cost,
            duration,
            started_at: None,
            progress: Fixed::ZERO,
            building,
        }
    }

    /// Whether production has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress >= Fixed::ONE
    }

    /// Progress as a whole percentage.
    #[must_use]
    pub fn percentage(&self) -> u32 {
        (self.progress.min(Fixed::ONE) * Fixed::from_num(100))
            .floor()
            .to_num::<u32>()
    }

    /// Advance by one tick.
    pub fn advance(&mut self, dt: Fixed, speed: Fixed) {
        if self.duration <= Fixed::ZERO {
            self.progress = Fixed::ONE;
            return;
        }
        self.progress = (self.progress + dt * speed / self.duration).min(Fixed::ONE);
    }
}

/// Current item plus waiting items, bounded in total length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductionQueue {
    current: Option<ProductionItem>,
    waiting: VecDeque<ProductionItem>,
    max_len: usize,
}

impl ProductionQueue {
    /// Create an empty queue holding at most `max_len` items.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            current: None,
            waiting: VecDeque::new(),
            max_len,
        }
    }

    /// Capacity, current item included.
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Items held, current item included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiting.len() + usize::from(self.current.is_some())
    }

    /// Whether nothing is queued or in progress.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether another item would exceed capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_len
    }

    /// Append an item.
    ///
    /// # Errors
    ///
    /// [`CommandError::QueueFull`] when at capacity.
    pub fn push(&mut self, item: ProductionItem) -> Result<(), CommandError> {
        if self.is_full() {
            return Err(CommandError::QueueFull);
        }
        self.waiting.push_back(item);
        Ok(())
    }

    /// Item in progress.
    #[must_use]
    pub fn current(&self) -> Option<&ProductionItem> {
        self.current.as_ref()
    }

    /// Item in progress, mutably.
    pub fn current_mut(&mut self) -> Option<&mut ProductionItem> {
        self.current.as_mut()
    }

    /// Waiting items, front first.
    pub fn waiting(&self) -> impl Iterator<Item = &ProductionItem> {
        self.waiting.iter()
    }

    /// Current item followed by waiting items.
    pub fn items(&self) -> impl Iterator<Item = &ProductionItem> {
        self.current.iter().chain(self.waiting.iter())
    }

    /// Move the head of the waiting list into the current slot if it is
    /// empty, stamping its start tick. Returns the newly started item.
    pub fn promote(&mut self, tick: u64) -> Option<&ProductionItem> {
        if self.current.is_some() {
            return None;
        }
        let mut next = self.waiting.pop_front()?;
        next.started_at = Some(tick);
        self.current = Some(next);
        self.current.as_ref()
    }

    /// Remove the current item.
    pub fn take_current(&mut self) -> Option<ProductionItem> {
        self.current.take()
    }

    /// Remove the most recently queued item, falling back to the current one.
    pub fn take_last(&mut self) -> Option<ProductionItem> {
        self.waiting.pop_back().or_else(|| self.current.take())
    }

    /// Remove a waiting item by index.
    pub fn remove_waiting(&mut self, index: usize) -> Option<ProductionItem> {
        self.waiting.remove(index)
    }

    /// Remove everything, current item first.
    pub fn drain(&mut self) -> Vec<ProductionItem> {
        self.current.take().into_iter().chain(self.waiting.drain(..)).collect()
    }

    /// Sum of the costs held by the queue.
    #[must_use]
    pub fn held_cost(&self) -> ResourceCost {
        let mut total = ResourceCost::new();
        for item in self.items() {
            for (resource, amount) in &item.cost {
                *total.entry(resource.clone()).or_default() += amount;
            }
        }
        total
    }
}

/// Advance one building's queue by a tick.
pub(crate) fn production_system(world: &mut World, building_id: EntityId) {
    let dt = world.dt();
    let tick = world.tick;
    let Some(building) = world.entities.building_mut(building_id) else {
        return;
    };
    if !building.built || !building.is_alive() {
        return;
    }

    if let Some(started) = building.production.promote(tick) {
        world.events.emit(GameEvent::ProductionStarted {
            building: building_id,
            kind: started.kind,
            name: started.name.clone(),
        });
    }

    let speed = building.production_speed;
    let Some(item) = building.production.current_mut() else {
        return;
    };
    item.advance(dt, speed);
    if !item.is_complete() {
        return;
    }
    let Some(item) = building.production.take_current() else {
        return;
    };
    finalize(world, building_id, item);
}

fn finalize(world: &mut World, building_id: EntityId, item: ProductionItem) {
    let outcome = match item.kind {
        ProductionKind::Unit => spawn_unit(world, building_id, &item.name).map(Some),
        ProductionKind::Research => {
            complete_research(world, building_id, &item.name);
            Ok(None)
        }
        ProductionKind::Upgrade => {
            apply_upgrade(world, building_id);
            Ok(None)
        }
    };

    match outcome {
        Ok(unit) => world.events.emit(GameEvent::ProductionComplete {
            building: building_id,
            kind: item.kind,
            name: item.name,
            unit,
        }),
        Err(reason) => fail_item(world, item, reason),
    }
}

/// Refund a failed item and announce it.
pub(crate) fn fail_item(world: &mut World, item: ProductionItem, reason: ProductionFailure) {
    tracing::warn!(
        building = item.building,
        item = %item.name,
        ?reason,
        "production failed, refunding"
    );
    refund(world, &item);
    world.events.emit(GameEvent::ProductionFailed {
        building: item.building,
        kind: item.kind,
        name: item.name,
        reason,
    });
}

/// Refund a cancelled item and announce it.
pub(crate) fn cancel_item(world: &mut World, item: ProductionItem) {
    refund(world, &item);
    world.events.emit(GameEvent::ProductionCancelled {
        building: item.building,
        kind: item.kind,
        name: item.name,
    });
}

fn refund(world: &mut World, item: &ProductionItem) {
    let Some(player) = world.entities.building(item.building).map(|b| b.player) else {
        return;
    };
    world
        .ledger
        .credit(player, &item.cost, ChangeReason::Refund, &mut world.events);
}

fn spawn_unit(
    world: &mut World,
    building_id: EntityId,
    unit_type: &str,
) -> Result<EntityId, ProductionFailure> {
    let Some(template) = world.catalog.unit(unit_type) else {
        tracing::error!(building = building_id, unit_type, "unit template missing from catalog");
        return Err(ProductionFailure::MissingTemplate);
    };
    let fields = template.fields.clone();
    let Some(building) = world.entities.building(building_id) else {
        return Err(ProductionFailure::BuildingDestroyed);
    };
    let player = building.player;
    let meeting_point = building.meeting_point;

    let cell = spawn_cells(building.cell, building.footprint, meeting_point)
        .into_iter()
        .find(|&cell| world.is_free_for(cell, &fields))
        .ok_or(ProductionFailure::NoSpace)?;

    let unit_id = world
        .create_unit(
            player,
            unit_type,
            Vec2Fixed::from_cell(cell),
            CreateOptions::free(),
        )
        .map_err(|e| match e {
            CreateError::UnknownType(_) => ProductionFailure::MissingTemplate,
            _ => ProductionFailure::NoSpace,
        })?;

    if let Some(target) = meeting_point {
        let issued_at = world.tick;
        if let Some(unit) = world.entities.unit_mut(unit_id) {
            unit.commands.set(Order {
                command: Command::Move { target },
                queued: false,
                issued_at,
            });
        }
    }
    Ok(unit_id)
}

/// Cells bordering a footprint, nearest to the meeting point first, then in
/// row-major order.
fn spawn_cells(
    anchor: CellCoord,
    footprint: (u32, u32),
    meeting_point: Option<Vec2Fixed>,
) -> Vec<CellCoord> {
    let (x0, y0) = anchor;
    let (x1, y1) = (x0 + footprint.0 as i32, y0 + footprint.1 as i32);
    let mut ring: Vec<CellCoord> = (y0 - 1..=y1)
        .flat_map(|y| (x0 - 1..=x1).map(move |x| (x, y)))
        .filter(|&(x, y)| x == x0 - 1 || x == x1 || y == y0 - 1 || y == y1)
        .collect();
    if let Some(point) = meeting_point {
        ring.sort_by_key(|&cell| Vec2Fixed::from_cell(cell).distance_squared(point));
    }
    ring
}

fn complete_research(world: &mut World, building_id: EntityId, tech: &str) {
    let Some(player_id) = world.entities.building(building_id).map(|b| b.player) else {
        return;
    };
    if let Some(player) = world.players.get_mut(&player_id) {
        player.technologies.insert(tech.to_string());
    }
    tracing::info!(player = player_id, tech, "research complete");
    world.events.emit(GameEvent::ResearchComplete {
        player: player_id,
        tech: tech.to_string(),
    });
}

fn apply_upgrade(world: &mut World, building_id: EntityId) {
    let catalog = world.catalog.clone();
    let Some(building) = world.entities.building_mut(building_id) else {
        return;
    };
    let Some(template) = catalog.building(&building.building_type) else {
        tracing::error!(building = building_id, "building template missing from catalog");
        return;
    };
    building.upgrade_level += 1;
    let Some(upgrade) = template.upgrade.as_ref() else {
        return;
    };

    let percent = |base: Fixed, pct: u32| base * Fixed::from_num(pct) / Fixed::from_num(100);
    let health_bonus = percent(Fixed::from_num(template.max_health), upgrade.health_bonus_percent);
    building.health.raise_max(health_bonus.floor().to_num::<u32>());
    building.production_speed += percent(template.production_speed, upgrade.production_speed_percent);
    for generation in &template.generates {
        let bonus = percent(generation.per_second, upgrade.generation_percent);
        *building
            .generation_rates
            .entry(generation.resource.clone())
            .or_default() += bonus;
    }
    tracing::info!(
        building = building_id,
        level = building.upgrade_level,
        "upgrade complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, gold: u32) -> ProductionItem {
        ProductionItem::new(
            ProductionKind::Unit,
            name,
            ResourceCost::from([("gold".to_string(), gold)]),
            Fixed::from_num(2),
            7,
        )
    }

    #[test]
    fn test_queue_capacity_counts_current() {
        let mut queue = ProductionQueue::new(2);
        queue.push(item("a", 1)).unwrap();
        assert!(queue.promote(3).is_some());
        queue.push(item("b", 1)).unwrap();
        assert_eq!(queue.push(item("c", 1)), Err(CommandError::QueueFull));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.current().and_then(|i| i.started_at), Some(3));
    }

    #[test]
    fn test_promote_only_when_slot_empty() {
        let mut queue = ProductionQueue::new(5);
        queue.push(item("a", 1)).unwrap();
        queue.push(item("b", 1)).unwrap();
        assert_eq!(queue.promote(0).map(|i| i.name.clone()), Some("a".into()));
        assert!(queue.promote(1).is_none());
        queue.take_current();
        assert_eq!(queue.promote(2).map(|i| i.name.clone()), Some("b".into()));
    }

    #[test]
    fn test_take_last_prefers_waiting_items() {
        let mut queue = ProductionQueue::new(5);
        queue.push(item("a", 1)).unwrap();
        assert_eq!(queue.take_last().map(|i| i.name), Some("a".into()));

        queue.push(item("b", 1)).unwrap();
        queue.push(item("c", 1)).unwrap();
        queue.promote(0);
        assert_eq!(queue.take_last().map(|i| i.name), Some("c".into()));
        assert_eq!(queue.take_last().map(|i| i.name), Some("b".into()));
        assert!(queue.take_last().is_none());
    }

    #[test]
    fn test_drain_and_held_cost() {
        let mut queue = ProductionQueue::new(5);
        queue.push(item("a", 10)).unwrap();
        queue.push(item("b", 15)).unwrap();
        queue.promote(0);
        assert_eq!(queue.held_cost().get("gold"), Some(&25));
        let names: Vec<_> = queue.drain().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_progress_scales_with_speed() {
        let dt = Fixed::ONE / Fixed::from_num(60);
        let mut slow = item("a", 0);
        let mut fast = item("a", 0);
        for _ in 0..61 {
            slow.advance(dt, Fixed::ONE);
            fast.advance(dt, Fixed::from_num(2));
        }
        assert_eq!(slow.percentage(), 50);
        assert!(fast.is_complete());
    }

    #[test]
    fn test_zero_duration_is_instant() {
        let mut instant = ProductionItem::new(
            ProductionKind::Research,
            "t",
            ResourceCost::new(),
            Fixed::ZERO,
            1,
        );
        instant.advance(Fixed::from_num(0.01), Fixed::ONE);
        assert!(instant.is_complete());
    }

    #[test]
    fn test_spawn_cells_ring() {
        let ring = spawn_cells((5, 5), (2, 1), None);
        assert_eq!(ring.len(), 10);
        assert_eq!(ring[0], (4, 4));
        assert!(!ring.contains(&(5, 5)));
        let toward = spawn_cells((5, 5), (2, 1), Some(Vec2Fixed::from_cell((10, 5))));
        assert_eq!(toward[0], (7, 5));
    }
}
