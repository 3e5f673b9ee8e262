//! Unit records, their resolved stats and state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::catalog::{Field, Layer, Stat, TechDefinition, TechEffectType, UnitTemplate};
use crate::command::{Command, CommandQueue};
use crate::ledger::ResourceCost;
use crate::math::{fixed_serde, seconds_to_ticks, CellCoord, Fixed, Vec2Fixed};
use crate::{EntityId, PlayerId};

/// Hit points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Health {
    /// Current health points.
    pub current: u32,
    /// Maximum health points.
    pub max: u32,
}

impl Health {
    /// Create new health component at full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// Check if entity is dead (health == 0).
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.current == 0
    }

    /// Check if entity is at full health.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.current >= self.max
    }

    /// Apply damage, returning actual damage dealt.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.current);
        self.current -= actual;
        actual
    }

    /// Heal, returning actual amount healed. Never exceeds `max`.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.max.saturating_sub(self.current));
        self.current += actual;
        actual
    }

    /// Raise the maximum, adding the same amount to current health.
    pub fn raise_max(&mut self, amount: u32) {
        self.max = self.max.saturating_add(amount);
        self.current = self.current.saturating_add(amount).min(self.max);
    }
}

/// Template stats after technology effects, fixed at instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitStats {
    /// Maximum hit points.
    pub max_health: u32,
    /// Flat armor.
    pub armor: u32,
    /// Cells per second.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
    /// Sight radius in cells.
    pub sight: u32,
    /// Damage per hit, zero without an attack skill.
    pub attack_strength: u32,
    /// Attack reach in cells.
    #[serde(with = "fixed_serde")]
    pub attack_range: Fixed,
    /// Ticks between hits.
    pub attack_cooldown_ticks: u64,
    /// Harvest units per second.
    #[serde(with = "fixed_serde")]
    pub gather_rate: Fixed,
}

impl UnitStats {
    /// Resolve a template against a set of researched technologies.
    pub fn resolve<'a>(
        template: &UnitTemplate,
        techs: impl IntoIterator<Item = &'a TechDefinition>,
        ticks_per_second: u32,
    ) -> Self {
        let attack = template.attack.as_ref();
        let mut stats = Self {
            max_health: template.max_health,
            armor: template.armor,
            speed: template.speed,
            sight: template.sight,
            attack_strength: attack.map_or(0, |a| a.strength),
            attack_range: attack.map_or(Fixed::ZERO, |a| a.range),
            attack_cooldown_ticks: attack.map_or(0, |a| seconds_to_ticks(a.cooldown, ticks_per_second)),
            gather_rate: template.harvest.as_ref().map_or(Fixed::ZERO, |h| h.rate),
        };

        for tech in techs {
            for effect in tech.effects.iter().filter(|e| e.applies(&template.name, &template.tags)) {
                match effect.effect_type {
                    TechEffectType::StatModifierPercent { stat, percent } => {
                        stats.scale(stat, Fixed::from_num(100 + percent) / Fixed::from_num(100));
                    }
                    TechEffectType::StatModifierFlat { stat, amount } => {
                        stats.add(stat, amount);
                    }
                }
            }
        }
        stats
    }

    fn scale(&mut self, stat: Stat, factor: Fixed) {
        let scale_int = |v: u32| (Fixed::from_num(v) * factor).max(Fixed::ZERO).floor().to_num::<u32>();
        match stat {
            Stat::MaxHealth => self.max_health = scale_int(self.max_health).max(1),
            Stat::Armor => self.armor = scale_int(self.armor),
            Stat::AttackStrength => self.attack_strength = scale_int(self.attack_strength),
            Stat::Sight => self.sight = scale_int(self.sight),
            Stat::AttackRange => self.attack_range = (self.attack_range * factor).max(Fixed::ZERO),
            Stat::Speed => self.speed = (self.speed * factor).max(Fixed::ZERO),
            Stat::GatherRate => self.gather_rate = (self.gather_rate * factor).max(Fixed::ZERO),
        }
    }

    fn add(&mut self, stat: Stat, amount: i32) {
        let add_int = |v: u32| v.saturating_add_signed(amount);
        match stat {
            Stat::MaxHealth => self.max_health = add_int(self.max_health).max(1),
            Stat::Armor => self.armor = add_int(self.armor),
            Stat::AttackStrength => self.attack_strength = add_int(self.attack_strength),
            Stat::Sight => self.sight = add_int(self.sight),
            Stat::AttackRange => {
                self.attack_range = (self.attack_range + Fixed::from_num(amount)).max(Fixed::ZERO);
            }
            Stat::Speed => self.speed = (self.speed + Fixed::from_num(amount)).max(Fixed::ZERO),
            Stat::GatherRate => {
                self.gather_rate = (self.gather_rate + Fixed::from_num(amount)).max(Fixed::ZERO);
            }
        }
    }
}

/// Unit state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitState {
    /// No active order, or waiting inside one.
    #[default]
    Idle,
    /// Walking toward a point.
    Moving {
        /// Current destination.
        target: Vec2Fixed,
    },
    /// Hitting an entity.
    Attacking {
        /// Target.
        target: EntityId,
    },
    /// Harvesting at a node.
    Gathering {
        /// Resource node.
        node: EntityId,
    },
    /// Constructing a building.
    Building {
        /// Construction site.
        target: EntityId,
    },
    /// Repairing a building.
    Repairing {
        /// Building.
        target: EntityId,
    },
    /// Zero health; becomes `Dead` next tick.
    Dying,
    /// Removed at the end of this tick.
    Dead,
}

impl UnitState {
    /// Whether the unit still takes part in the simulation.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Dying | Self::Dead)
    }

    /// Whether this state may coexist with `command` as the current order.
    #[must_use]
    pub fn is_consistent_with(self, command: Option<&Command>) -> bool {
        match (self, command) {
            (Self::Dying | Self::Dead, _) => true,
            (Self::Idle, None) => true,
            (_, None) => false,
            (state, Some(command)) => match command {
                Command::Move { .. }
                | Command::Formation { .. }
                | Command::GroupMove { .. }
                | Command::Follow { .. } => matches!(state, Self::Idle | Self::Moving { .. }),
                Command::Attack { .. } | Command::Patrol { .. } | Command::Guard { .. } => {
                    matches!(state, Self::Idle | Self::Moving { .. } | Self::Attacking { .. })
                }
                Command::Hold => matches!(state, Self::Idle | Self::Attacking { .. }),
                Command::Gather { .. } => {
                    matches!(state, Self::Idle | Self::Moving { .. } | Self::Gathering { .. })
                }
                Command::Build { .. } => {
                    matches!(state, Self::Idle | Self::Moving { .. } | Self::Building { .. })
                }
                Command::Repair { .. } => matches!(
                    state,
                    Self::Idle | Self::Moving { .. } | Self::Building { .. } | Self::Repairing { .. }
                ),
                _ => matches!(state, Self::Idle),
            },
        }
    }
}

/// Path-following state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct Navigation {
    /// Cell the current waypoints lead to.
    pub goal_cell: Option<CellCoord>,
    pub waypoints: VecDeque<Vec2Fixed>,
    /// Front waypoint is a one-step detour.
    pub detour: bool,
}

impl Navigation {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Harvest trip phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub(crate) enum GatherPhase {
    #[default]
    ToNode,
    ToDeposit,
}

/// Per-order progress that does not belong to the unit's public state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct TaskState {
    pub patrol_origin: Option<Vec2Fixed>,
    pub patrol_outbound: bool,
    pub gather_node: Option<EntityId>,
    pub gather_resource: Option<String>,
    pub gather_phase: GatherPhase,
    pub gather_progress: Fixed,
    pub build_site: Option<EntityId>,
    /// Fractional hit points not yet applied.
    pub repair_carry: Fixed,
    /// Hit points restored by the current order.
    pub repair_total: u32,
    pub repair_paid: ResourceCost,
    pub stalled_ticks: u64,
}

/// A mobile unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit {
    /// Stable ID.
    pub id: EntityId,
    /// Owner.
    pub player: PlayerId,
    /// Template name.
    pub unit_type: String,
    /// Position on the grid.
    pub position: Vec2Fixed,
    /// Displacement during the last tick.
    pub velocity: Vec2Fixed,
    /// Hit points.
    pub health: Health,
    /// Energy, for templates that have it.
    pub energy: Option<u32>,
    /// State machine state.
    pub state: UnitState,
    /// Current and waiting orders.
    pub commands: CommandQueue,
    /// Resources being carried.
    pub carried: ResourceCost,
    /// First tick the next hit may land.
    pub next_attack_tick: u64,
    /// Resolved stats.
    pub stats: UnitStats,
    /// Technologies applied at instantiation.
    pub applied_techs: Vec<String>,
    /// Movement fields.
    pub fields: Vec<Field>,
    pub(crate) occupied: Option<CellCoord>,
    pub(crate) nav: Navigation,
    pub(crate) task: TaskState,
}

impl Unit {
    /// Occupancy layer.
    #[must_use]
    pub fn layer(&self) -> Layer {
        self.fields.first().copied().unwrap_or(Field::Land).layer()
    }

    /// Whether the unit is alive and not dying.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state.is_alive() && !self.health.is_dead()
    }

    /// Cell containing the unit.
    #[must_use]
    pub fn cell(&self) -> CellCoord {
        self.position.cell()
    }

    /// Total carried amount.
    #[must_use]
    pub fn carried_total(&self) -> u32 {
        self.carried.values().sum()
    }

    /// Drop per-order progress when the current order changes.
    pub(crate) fn reset_task(&mut self) {
        self.nav.clear();
        self.task = TaskState::default();
        self.velocity = Vec2Fixed::ZERO;
    }
}
