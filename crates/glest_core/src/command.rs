//! Player intent: commands, orders and per-entity command queues.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::math::Vec2Fixed;
use crate::{EntityId, PlayerId};

/// Shape used by [`Command::Formation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationShape {
    /// Side by side across the x axis.
    Line,
    /// One behind another along the y axis.
    Column,
    /// Square block, row-major.
    Box,
}

/// Commands that can be issued to units and buildings.
///
/// Targets are referenced by ID only; they are re-validated every time the
/// order is advanced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Move to a position.
    Move {
        /// Destination.
        target: Vec2Fixed,
    },
    /// Attack an entity, pursuing it.
    Attack {
        /// Target unit or building.
        target: EntityId,
    },
    /// Clear all orders and idle.
    Stop,
    /// Stay put, engaging enemies in range.
    Hold,
    /// Harvest from a resource node.
    Gather {
        /// Resource node.
        node: EntityId,
    },
    /// Place and construct a building.
    Build {
        /// Building template.
        building_type: String,
        /// Footprint anchor cell.
        cell: (i32, i32),
    },
    /// Repair a building or finish its construction.
    Repair {
        /// Target building.
        target: EntityId,
    },
    /// Walk back and forth, engaging enemies in range.
    Patrol {
        /// Far end of the patrol route.
        target: Vec2Fixed,
    },
    /// Stay close to another unit.
    Follow {
        /// Unit to follow.
        target: EntityId,
    },
    /// Stay close to an entity and fight off attackers.
    Guard {
        /// Entity to guard.
        target: EntityId,
    },
    /// Move in formation around an anchor.
    Formation {
        /// Formation centre.
        anchor: Vec2Fixed,
        /// Layout.
        shape: FormationShape,
        /// This unit's slot offset, resolved by the command processor.
        offset: Vec2Fixed,
    },
    /// Move a group keeping relative positions.
    GroupMove {
        /// Group destination.
        anchor: Vec2Fixed,
        /// This unit's offset, resolved by the command processor.
        offset: Vec2Fixed,
    },
    /// Queue a unit in a building.
    ProduceUnit {
        /// Unit template.
        unit_type: String,
    },
    /// Queue a technology in a building.
    StartResearch {
        /// Technology.
        tech: String,
    },
    /// Queue the building's next upgrade level.
    StartUpgrade,
    /// Cancel the current item (`None`) or a queued item by index.
    CancelProduction {
        /// Index into the waiting queue; `None` means the last item, waiting or
        /// in progress.
        index: Option<usize>,
    },
    /// Cancel everything in the production queue.
    ClearProductionQueue,
    /// Where produced units walk to.
    SetMeetingPoint {
        /// Meeting point; `None` clears it.
        position: Option<Vec2Fixed>,
    },
}

/// Discriminant of [`Command`], used for capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CommandKind {
    Move,
    Attack,
    Stop,
    Hold,
    Gather,
    Build,
    Repair,
    Patrol,
    Follow,
    Guard,
    Formation,
    GroupMove,
    ProduceUnit,
    StartResearch,
    StartUpgrade,
    CancelProduction,
    ClearProductionQueue,
    SetMeetingPoint,
}

impl Command {
    /// Kind of this command.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Move { .. } => CommandKind::Move,
            Self::Attack { .. } => CommandKind::Attack,
            Self::Stop => CommandKind::Stop,
            Self::Hold => CommandKind::Hold,
            Self::Gather { .. } => CommandKind::Gather,
            Self::Build { .. } => CommandKind::Build,
            Self::Repair { .. } => CommandKind::Repair,
            Self::Patrol { .. } => CommandKind::Patrol,
            Self::Follow { .. } => CommandKind::Follow,
            Self::Guard { .. } => CommandKind::Guard,
            Self::Formation { .. } => CommandKind::Formation,
            Self::GroupMove { .. } => CommandKind::GroupMove,
            Self::ProduceUnit { .. } => CommandKind::ProduceUnit,
            Self::StartResearch { .. } => CommandKind::StartResearch,
            Self::StartUpgrade => CommandKind::StartUpgrade,
            Self::CancelProduction { .. } => CommandKind::CancelProduction,
            Self::ClearProductionQueue => CommandKind::ClearProductionQueue,
            Self::SetMeetingPoint { .. } => CommandKind::SetMeetingPoint,
        }
    }

    /// Whether `other` asks for the same thing. Group and formation offsets
    /// are recomputed from current positions, so only the anchor and shape
    /// count.
    #[must_use]
    pub fn same_goal(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::GroupMove { anchor: a, .. }, Self::GroupMove { anchor: b, .. }) => a == b,
            (
                Self::Formation { anchor: a, shape: sa, .. },
                Self::Formation { anchor: b, shape: sb, .. },
            ) => a == b && sa == sb,
            _ => self == other,
        }
    }
}

impl CommandKind {
    /// Commands addressed to buildings rather than units.
    #[must_use]
    pub const fn targets_building(self) -> bool {
        matches!(
            self,
            Self::ProduceUnit
                | Self::StartResearch
                | Self::StartUpgrade
                | Self::CancelProduction
                | Self::ClearProductionQueue
                | Self::SetMeetingPoint
        )
    }
}

/// A command attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    /// The command.
    pub command: Command,
    /// Whether it was appended rather than replacing.
    pub queued: bool,
    /// Tick the order was accepted.
    pub issued_at: u64,
}

/// Inbound player intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandSubmission {
    /// Issuing player.
    pub player: PlayerId,
    /// Units (or one building) the command applies to.
    pub entities: Vec<EntityId>,
    /// The command.
    pub command: Command,
    /// Append instead of replace.
    pub queued: bool,
}

impl CommandSubmission {
    /// Non-queued submission for a single entity.
    #[must_use]
    pub fn new(player: PlayerId, entity: EntityId, command: Command) -> Self {
        Self {
            player,
            entities: vec![entity],
            command,
            queued: false,
        }
    }

    /// Non-queued submission for several units.
    #[must_use]
    pub fn group(player: PlayerId, entities: Vec<EntityId>, command: Command) -> Self {
        Self {
            player,
            entities,
            command,
            queued: false,
        }
    }

    /// Mark as queued.
    #[must_use]
    pub fn queued(mut self) -> Self {
        self.queued = true;
        self
    }
}

/// Current order plus waiting orders.
///
/// The next waiting order is promoted only by [`CommandQueue::promote`],
/// which the state machine calls at the start of a unit's update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandQueue {
    current: Option<Order>,
    waiting: VecDeque<Order>,
}

impl CommandQueue {
    /// Create an empty command queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a single order.
    pub fn set(&mut self, order: Order) {
        self.waiting.clear();
        self.current = Some(order);
    }

    /// Append an order behind the current one.
    pub fn push(&mut self, order: Order) {
        self.waiting.push_back(order);
    }

    /// Order being executed.
    #[must_use]
    pub fn current(&self) -> Option<&Order> {
        self.current.as_ref()
    }

    /// Mutable access to the order being executed.
    pub fn current_mut(&mut self) -> Option<&mut Order> {
        self.current.as_mut()
    }

    /// Waiting orders, front first.
    pub fn waiting(&self) -> impl Iterator<Item = &Order> {
        self.waiting.iter()
    }

    /// Finish the current order without promoting the next.
    pub fn complete(&mut self) -> Option<Order> {
        self.current.take()
    }

    /// Promote the next waiting order if nothing is current.
    ///
    /// Returns `true` if a new order became current.
    pub fn promote(&mut self) -> bool {
        if self.current.is_some() {
            return false;
        }
        self.current = self.waiting.pop_front();
        self.current.is_some()
    }

    /// Drop every order.
    pub fn clear(&mut self) {
        self.current = None;
        self.waiting.clear();
    }

    /// Whether there are no orders at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.waiting.is_empty()
    }

    /// Number of waiting orders, excluding the current one.
    #[must_use]
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Fixed;

    fn order(x: i32, queued: bool) -> Order {
        Order {
            command: Command::Move {
                target: Vec2Fixed::new(Fixed::from_num(x), Fixed::ZERO),
            },
            queued,
            issued_at: 0,
        }
    }

    #[test]
    fn test_set_replaces_and_clears() {
        let mut queue = CommandQueue::new();
        queue.set(order(1, false));
        queue.push(order(2, true));
        queue.push(order(3, true));
        assert_eq!(queue.waiting_len(), 2);

        queue.set(order(9, false));
        assert_eq!(queue.current(), Some(&order(9, false)));
        assert_eq!(queue.waiting_len(), 0);
    }

    #[test]
    fn test_promotion_is_explicit() {
        let mut queue = CommandQueue::new();
        queue.set(order(1, false));
        queue.push(order(2, true));

        assert!(!queue.promote());
        queue.complete();
        assert!(queue.current().is_none());
        assert!(!queue.is_empty());

        assert!(queue.promote());
        assert_eq!(queue.current(), Some(&order(2, true)));
        assert_eq!(queue.waiting_len(), 0);
    }

    #[test]
    fn test_kind_and_routing() {
        assert_eq!(Command::Stop.kind(), CommandKind::Stop);
        assert!(CommandKind::ProduceUnit.targets_building());
        assert!(!CommandKind::Gather.targets_building());
        let submission = CommandSubmission::new(1, 5, Command::Hold).queued();
        assert!(submission.queued);
        assert_eq!(submission.entities, vec![5]);
    }
}
