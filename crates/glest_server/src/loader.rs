//! Game loading from RON files on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use glest_core::catalog::Catalog;
use glest_core::config::GameConfig;
use glest_core::error::{GameError, Result};
use glest_core::simulation::Simulation;

/// A config together with the simulation built from it.
#[derive(Debug)]
pub struct LoadedGame {
    /// Parsed configuration.
    pub config: GameConfig,
    /// Ready-to-run simulation at tick 0.
    pub simulation: Simulation,
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| GameError::DataParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Parse a [`GameConfig`] file.
///
/// # Errors
///
/// [`GameError::DataParseError`] if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<GameConfig> {
    let source = read(path)?;
    GameConfig::from_ron_str(&source, &path.display().to_string())
}

/// Load and validate a tech tree file.
///
/// # Errors
///
/// [`GameError::DataParseError`] for unreadable or malformed files, or the
/// first reference error the catalog reports.
pub fn load_catalog(path: &Path) -> Result<Arc<Catalog>> {
    let source = read(path)?;
    let catalog = Catalog::from_ron_str(&source, &path.display().to_string())?;
    tracing::info!(
        tech_tree = catalog.name(),
        path = %path.display(),
        "tech tree loaded"
    );
    Ok(Arc::new(catalog))
}

/// Load a config, its tech tree and build the simulation.
///
/// # Errors
///
/// Anything [`load_config`], [`load_catalog`] or [`Simulation::new`]
/// reports.
pub fn load_simulation(config_path: &Path) -> Result<LoadedGame> {
    let config = load_config(config_path)?;
    let catalog = load_catalog(&config.tech_tree_location(config_path))?;
    let simulation = Simulation::new(&config, catalog)?;
    tracing::info!(
        players = config.player_factions.len(),
        width = config.map.width,
        height = config.map.height,
        "game loaded"
    );
    Ok(LoadedGame { config, simulation })
}
