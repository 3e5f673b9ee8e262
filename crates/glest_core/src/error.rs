//! Error types for the game simulation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EntityId, PlayerId};

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Errors raised while constructing or loading a game.
///
/// The tick path never returns these: once a [`crate::simulation::Simulation`]
/// exists, bad input is rejected through [`CommandError`] or absorbed by the
/// state machines.
#[derive(Debug, Error)]
pub enum GameError {
    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// A catalog entry references a template that does not exist.
    #[error("Unknown template '{name}' referenced by {referenced_by}")]
    UnknownTemplate {
        /// Missing template name.
        name: String,
        /// The entry holding the dangling reference.
        referenced_by: String,
    },

    /// A catalog entry holds a value the simulation cannot represent.
    #[error("Invalid {field} in {owner}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: String,
        /// The entry holding it.
        owner: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Player referenced by configuration does not exist.
    #[error("Invalid player: {0}")]
    InvalidPlayer(PlayerId),

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Entity creation during world setup failed.
    #[error("Failed to create entity: {0}")]
    Create(#[from] CreateError),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),
}

/// Why a command submission was rejected.
///
/// Rejection never mutates the world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum CommandError {
    /// Target entity is missing, dead, or the wrong kind for this command.
    #[error("invalid target")]
    InvalidTarget,
    /// Entity belongs to another player.
    #[error("entity is not owned by the issuing player")]
    NotOwner,
    /// No path exists under the unit's movement fields.
    #[error("target is unreachable")]
    Unreachable,
    /// Player cannot pay for the command.
    #[error("insufficient resources")]
    InsufficientResources,
    /// The entity's template does not support this command.
    #[error("command not supported by this entity")]
    UnsupportedCapability,
    /// Production queue is at maximum depth.
    #[error("production queue is full")]
    QueueFull,
    /// Building is unfinished or a required technology is missing.
    #[error("prerequisites not met")]
    PrerequisitesNotMet,
    /// Technology is already researched or in progress.
    #[error("technology already researched or in progress")]
    AlreadyResearched,
    /// Building is already at (or queued to) its maximum upgrade level.
    #[error("building is at maximum upgrade level")]
    MaxUpgradeLevel,
    /// Issuing player does not exist.
    #[error("unknown player")]
    InvalidPlayer,
    /// Submission is structurally invalid.
    #[error("malformed command")]
    Malformed,
}

/// Why an entity could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
    /// Template name is not in the catalog.
    #[error("unknown entity type '{0}'")]
    UnknownType(String),
    /// Target cell (or a footprint cell) is occupied or not walkable.
    #[error("no space at the requested position")]
    NoSpace,
    /// Position lies outside the map.
    #[error("position is off the map")]
    OffMap,
    /// Owner could not pay the construction cost.
    #[error("insufficient resources")]
    ResourceInsufficient,
    /// Owner does not exist.
    #[error("invalid player {0}")]
    InvalidPlayer(PlayerId),
}

/// Atomic debit failure from the resource ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Insufficient resources: need {required} {resource}, have {available}")]
pub struct InsufficientResources {
    /// First resource found short, in ascending name order.
    pub resource: String,
    /// Amount required.
    pub required: u32,
    /// Amount available.
    pub available: u32,
}
