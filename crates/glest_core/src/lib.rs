//! # Glest Core
//!
//! Deterministic simulation core for a Megaglest-style real-time strategy
//! game.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No wall-clock
//! - No floating-point math in the tick path (uses fixed-point)
//!
//! The host decides how fast ticks run; given the same catalog, config and
//! command stream, every run produces the same sequence of snapshots.
//!
//! ## Crate Structure
//!
//! - [`catalog`] - Tech tree data: resources, factions, unit and building templates
//! - [`world`] - The world: map, players, resource nodes, entity tables, ledger
//! - [`dispatch`] - Command validation and attachment
//! - [`behavior`] - Per-unit state machine
//! - [`production`] - Production, research and upgrade queues
//! - [`simulation`] - Tick loop, inbound queue and read view
//! - [`view`] - Snapshot-consistent read view
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod behavior;
pub mod building;
pub mod catalog;
pub mod combat;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod economy;
pub mod entities;
pub mod error;
pub mod events;
pub mod ledger;
pub mod map;
pub mod math;
pub mod pathfinding;
pub mod player;
pub mod production;
pub mod simulation;
pub mod unit;
pub mod view;
pub mod world;

/// Stable identifier of a unit, building or resource node.
pub type EntityId = u64;

/// Player identifier.
pub type PlayerId = u32;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::building::{Building, Lifecycle};
    pub use crate::catalog::{BuildingTemplate, Catalog, Field, Layer, TechTreeData, UnitTemplate};
    pub use crate::command::{Command, CommandKind, CommandSubmission, FormationShape};
    pub use crate::config::{GameConfig, GameSpeed};
    pub use crate::error::{CommandError, CreateError, GameError, Result};
    pub use crate::events::{ChangeReason, EventKind, GameEvent};
    pub use crate::ledger::ResourceCost;
    pub use crate::map::{MapData, Terrain};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::production::{ProductionItem, ProductionKind, ProductionQueue};
    pub use crate::simulation::Simulation;
    pub use crate::unit::{Unit, UnitState};
    pub use crate::view::{SharedView, WorldSnapshot};
    pub use crate::world::{CreateOptions, World};
    pub use crate::{EntityId, PlayerId};
}
