//! # Glest Server
//!
//! Headless host for the simulation core.
//!
//! Loads a game description from disk and runs the simulation on a
//! dedicated thread at the configured game speed. Other threads submit
//! commands through a channel and read the committed snapshot.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod loader;
pub mod tick_loop;

use thiserror::Error;

use glest_core::error::GameError;

/// Errors raised by the host.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Loading or building the game failed.
    #[error(transparent)]
    Game(#[from] GameError),

    /// The worker thread could not be started.
    #[error("failed to start tick thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread panicked; the simulation is lost.
    #[error("tick thread panicked")]
    WorkerPanicked,
}

/// Result type alias using [`ServerError`].
pub type Result<T> = std::result::Result<T, ServerError>;
