//! Buffered, typed event bus.
//!
//! Systems emit [`GameEvent`]s while the tick runs; nothing is delivered
//! until [`EventBus::flush`] at the end of the tick, so subscribers never
//! observe partial state. Within a flush, events go out in emission order
//! and each event reaches its subscribers in registration order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::production::ProductionKind;
use crate::{EntityId, PlayerId};

/// Signed per-resource change.
pub type ResourceDelta = BTreeMap<String, i64>;

/// Why a resource account changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    /// Starting endowment.
    Initial,
    /// Harvester deposit.
    Gathered,
    /// Passive building generation.
    Generated,
    /// Production, research or upgrade enqueued.
    Production,
    /// Cancelled or failed production.
    Refund,
    /// Incremental construction payment.
    Construction,
    /// Incremental repair payment.
    Repair,
    /// Direct adjustment through the world API.
    Adjustment,
}

/// Whether an entity is a unit or a building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Mobile unit.
    Unit,
    /// Building.
    Building,
}

/// Why production could not finalize.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductionFailure {
    /// No free cell around the building.
    NoSpace,
    /// Template vanished from the catalog.
    MissingTemplate,
    /// Building was destroyed with the item queued.
    BuildingDestroyed,
}

/// Notification emitted by the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameEvent {
    /// A unit entered the world.
    UnitCreated {
        /// New unit.
        unit: EntityId,
        /// Owner.
        player: PlayerId,
        /// Template name.
        unit_type: String,
    },
    /// A building was placed, finished or as a construction site.
    BuildingCreated {
        /// New building.
        building: EntityId,
        /// Owner.
        player: PlayerId,
        /// Template name.
        building_type: String,
    },
    /// An entity reached zero health.
    UnitDying {
        /// Entity.
        entity: EntityId,
        /// Unit or building.
        kind: EntityKind,
        /// Owner.
        player: PlayerId,
    },
    /// An entity finished dying and leaves the world this tick.
    UnitDied {
        /// Entity.
        entity: EntityId,
        /// Unit or building.
        kind: EntityKind,
        /// Owner.
        player: PlayerId,
    },
    /// A hit landed.
    UnitAttacked {
        /// Attacking unit.
        attacker: EntityId,
        /// Target entity.
        target: EntityId,
        /// Damage dealt.
        damage: u32,
        /// Target health after the hit.
        remaining_health: u32,
    },
    /// A production item became current.
    ProductionStarted {
        /// Producing building.
        building: EntityId,
        /// Item kind.
        kind: ProductionKind,
        /// Item name.
        name: String,
    },
    /// A production item finished.
    ProductionComplete {
        /// Producing building.
        building: EntityId,
        /// Item kind.
        kind: ProductionKind,
        /// Item name.
        name: String,
        /// Unit created, for unit production.
        unit: Option<EntityId>,
    },
    /// A production item could not finalize and was refunded.
    ProductionFailed {
        /// Producing building.
        building: EntityId,
        /// Item kind.
        kind: ProductionKind,
        /// Item name.
        name: String,
        /// Failure cause.
        reason: ProductionFailure,
    },
    /// A production item was cancelled and refunded.
    ProductionCancelled {
        /// Producing building.
        building: EntityId,
        /// Item kind.
        kind: ProductionKind,
        /// Item name.
        name: String,
    },
    /// A technology was researched.
    ResearchComplete {
        /// Researching player.
        player: PlayerId,
        /// Technology name.
        tech: String,
    },
    /// A resource account changed.
    ResourcesChanged {
        /// Account owner.
        player: PlayerId,
        /// Per-resource change.
        delta: ResourceDelta,
        /// Cause.
        reason: ChangeReason,
    },
    /// A builder placed a new construction site.
    ConstructionStarted {
        /// New building.
        building: EntityId,
        /// Builder.
        builder: EntityId,
        /// Owner.
        player: PlayerId,
    },
    /// Construction finished.
    BuildingCompleted {
        /// Building.
        building: EntityId,
        /// Owner.
        player: PlayerId,
    },
    /// A running order could not continue.
    CommandFailed {
        /// Unit whose order failed.
        unit: EntityId,
        /// Cause.
        reason: CommandError,
    },
    /// A queued submission was rejected when drained.
    CommandRejected {
        /// Issuing player.
        player: PlayerId,
        /// Cause.
        reason: CommandError,
    },
    /// A build or repair paused for lack of resources.
    ActionStalled {
        /// Unit doing the work.
        unit: EntityId,
        /// Building being worked on.
        target: EntityId,
    },
    /// A resource node ran out.
    NodeDepleted {
        /// Node.
        node: EntityId,
    },
    /// The tick loop fell behind and dropped ticks.
    SlowTick {
        /// Ticks dropped.
        dropped: u64,
    },
}

/// Discriminant of [`GameEvent`] used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EventKind {
    UnitCreated,
    BuildingCreated,
    UnitDying,
    UnitDied,
    UnitAttacked,
    ProductionStarted,
    ProductionComplete,
    ProductionFailed,
    ProductionCancelled,
    ResearchComplete,
    ResourcesChanged,
    ConstructionStarted,
    BuildingCompleted,
    CommandFailed,
    CommandRejected,
    ActionStalled,
    NodeDepleted,
    SlowTick,
}

impl GameEvent {
    /// Subscription key for this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UnitCreated { .. } => EventKind::UnitCreated,
            Self::BuildingCreated { .. } => EventKind::BuildingCreated,
            Self::UnitDying { .. } => EventKind::UnitDying,
            Self::UnitDied { .. } => EventKind::UnitDied,
            Self::UnitAttacked { .. } => EventKind::UnitAttacked,
            Self::ProductionStarted { .. } => EventKind::ProductionStarted,
            Self::ProductionComplete { .. } => EventKind::ProductionComplete,
            Self::ProductionFailed { .. } => EventKind::ProductionFailed,
            Self::ProductionCancelled { .. } => EventKind::ProductionCancelled,
            Self::ResearchComplete { .. } => EventKind::ResearchComplete,
            Self::ResourcesChanged { .. } => EventKind::ResourcesChanged,
            Self::ConstructionStarted { .. } => EventKind::ConstructionStarted,
            Self::BuildingCompleted { .. } => EventKind::BuildingCompleted,
            Self::CommandFailed { .. } => EventKind::CommandFailed,
            Self::CommandRejected { .. } => EventKind::CommandRejected,
            Self::ActionStalled { .. } => EventKind::ActionStalled,
            Self::NodeDepleted { .. } => EventKind::NodeDepleted,
            Self::SlowTick { .. } => EventKind::SlowTick,
        }
    }
}

/// Subscriber callback. Must not block; copy out what you need.
pub type EventHandler = Box<dyn FnMut(&GameEvent) + Send>;

/// Buffered publish/subscribe hub.
#[derive(Default)]
pub struct EventBus {
    pending: Vec<GameEvent>,
    subscribers: BTreeMap<EventKind, Vec<EventHandler>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pending", &self.pending.len())
            .field(
                "subscribers",
                &self.subscribers.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an event for the next flush.
    pub fn emit(&mut self, event: GameEvent) {
        self.pending.push(event);
    }

    /// Register a handler for one event kind.
    pub fn subscribe(&mut self, kind: EventKind, handler: EventHandler) {
        self.subscribers.entry(kind).or_default().push(handler);
    }

    /// Events buffered since the last flush.
    #[must_use]
    pub fn pending(&self) -> &[GameEvent] {
        &self.pending
    }

    /// Deliver buffered events and return them.
    pub fn flush(&mut self) -> Vec<GameEvent> {
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            if let Some(handlers) = self.subscribers.get_mut(&event.kind()) {
                for handler in handlers.iter_mut() {
                    handler(event);
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn slow_tick(dropped: u64) -> GameEvent {
        GameEvent::SlowTick { dropped }
    }

    #[test]
    fn test_events_are_buffered_until_flush() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventKind::SlowTick,
            Box::new(move |e| sink.lock().unwrap().push(e.clone())),
        );

        bus.emit(slow_tick(1));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.pending().len(), 1);

        let flushed = bus.flush();
        assert_eq!(flushed, vec![slow_tick(1)]);
        assert_eq!(*seen.lock().unwrap(), vec![slow_tick(1)]);
        assert!(bus.pending().is_empty());
    }

    #[test]
    fn test_delivery_follows_emission_then_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            bus.subscribe(
                EventKind::SlowTick,
                Box::new(move |e| {
                    if let GameEvent::SlowTick { dropped } = e {
                        log.lock().unwrap().push(format!("{tag}:{dropped}"));
                    }
                }),
            );
        }

        bus.emit(slow_tick(1));
        bus.emit(slow_tick(2));
        bus.flush();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:1", "second:1", "first:2", "second:2"]
        );
    }

    #[test]
    fn test_subscribers_only_see_their_kind() {
        let count = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        let counter = Arc::clone(&count);
        bus.subscribe(
            EventKind::NodeDepleted,
            Box::new(move |_| *counter.lock().unwrap() += 1),
        );
        bus.emit(slow_tick(1));
        bus.emit(GameEvent::NodeDepleted { node: 4 });
        bus.flush();
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
