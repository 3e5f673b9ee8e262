//! Game-start configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::map::MapData;
use crate::math::{decimal_serde, Fixed};
use crate::PlayerId;

/// Default simulation rate.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 60;

/// Default production queue depth (queued plus current).
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 5;

/// Wall-clock speed of the tick loop.
///
/// Game speed changes how often ticks run, never the simulated `dt`, so a
/// game replays identically at any speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameSpeed {
    /// 25%.
    Slowest,
    /// 50%.
    VerySlow,
    /// 75%.
    Slow,
    /// 100%.
    #[default]
    Normal,
    /// 150%.
    Fast,
    /// 200%.
    VeryFast,
    /// 300%.
    Fastest,
}

impl GameSpeed {
    /// Speed as a percentage of real time.
    #[must_use]
    pub const fn percent(self) -> u32 {
        match self {
            Self::Slowest => 25,
            Self::VerySlow => 50,
            Self::Slow => 75,
            Self::Normal => 100,
            Self::Fast => 150,
            Self::VeryFast => 200,
            Self::Fastest => 300,
        }
    }
}

/// Configuration fixed at game start.
///
/// # Example RON
///
/// ```ron
/// GameConfig(
///     tech_tree_path: "magitech.ron",
///     max_players: 2,
///     game_speed: Normal,
///     resource_multiplier: 1.0,
///     player_factions: { 1: "magic", 2: "tech" },
///     ai_players: [2],
///     map: MapData(width: 64, height: 64, start_positions: [(8, 8), (54, 54)]),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Tech tree file, relative to the configuration file.
    pub tech_tree_path: PathBuf,

    /// Upper bound on players.
    #[serde(default = "default_max_players")]
    pub max_players: u32,

    /// Wall-clock speed.
    #[serde(default)]
    pub game_speed: GameSpeed,

    /// Scales starting endowments and gather rates.
    #[serde(default = "default_multiplier", with = "decimal_serde")]
    pub resource_multiplier: Fixed,

    /// Player id → faction name.
    pub player_factions: BTreeMap<PlayerId, String>,

    /// Players driven by AI.
    #[serde(default)]
    pub ai_players: BTreeSet<PlayerId>,

    /// Simulation ticks per game second.
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,

    /// Ticks the loop may fall behind before dropping.
    #[serde(default = "default_max_queued_ticks")]
    pub max_queued_ticks: u32,

    /// Default production queue depth.
    #[serde(default = "default_max_queue")]
    pub max_production_queue: usize,

    /// Seconds a stalled build or repair waits for funds.
    #[serde(default = "default_stall_grace", with = "decimal_serde")]
    pub stall_grace_seconds: Fixed,

    /// Map layout.
    pub map: MapData,
}

const fn default_max_players() -> u32 {
    8
}

fn default_multiplier() -> Fixed {
    Fixed::ONE
}

const fn default_ticks_per_second() -> u32 {
    DEFAULT_TICKS_PER_SECOND
}

const fn default_max_queued_ticks() -> u32 {
    5
}

const fn default_max_queue() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_stall_grace() -> Fixed {
    Fixed::from_num(10)
}

impl GameConfig {
    /// Minimal configuration around a map, used by tests and tools.
    #[must_use]
    pub fn new(player_factions: BTreeMap<PlayerId, String>, map: MapData) -> Self {
        Self {
            tech_tree_path: PathBuf::new(),
            max_players: default_max_players(),
            game_speed: GameSpeed::default(),
            resource_multiplier: default_multiplier(),
            player_factions,
            ai_players: BTreeSet::new(),
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            max_queued_ticks: default_max_queued_ticks(),
            max_production_queue: DEFAULT_MAX_QUEUE_SIZE,
            stall_grace_seconds: default_stall_grace(),
            map,
        }
    }

    /// Parse a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::DataParseError`] on malformed input and
    /// [`GameError::InvalidConfig`] if the result fails [`GameConfig::validate`].
    pub fn from_ron_str(source: &str, origin: &str) -> Result<Self> {
        let config: Self = ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`GameError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.player_factions.is_empty() {
            return Err(GameError::InvalidConfig("no players configured".into()));
        }
        if self.player_factions.len() > self.max_players as usize {
            return Err(GameError::InvalidConfig(format!(
                "{} players exceed max_players {}",
                self.player_factions.len(),
                self.max_players
            )));
        }
        if self.ticks_per_second == 0 {
            return Err(GameError::InvalidConfig("ticks_per_second must be positive".into()));
        }
        if self.resource_multiplier < Fixed::ZERO {
            return Err(GameError::InvalidConfig("resource_multiplier must not be negative".into()));
        }
        if self.max_production_queue == 0 {
            return Err(GameError::InvalidConfig("max_production_queue must be positive".into()));
        }
        if let Some(ai) = self.ai_players.iter().find(|p| !self.player_factions.contains_key(p)) {
            return Err(GameError::InvalidPlayer(*ai));
        }
        if self.map.start_positions.len() < self.player_factions.len() {
            return Err(GameError::InvalidConfig(format!(
                "map has {} start positions for {} players",
                self.map.start_positions.len(),
                self.player_factions.len()
            )));
        }
        Ok(())
    }

    /// Fixed simulation step in seconds.
    #[must_use]
    pub fn dt(&self) -> Fixed {
        Fixed::ONE / Fixed::from_num(self.ticks_per_second.max(1))
    }

    /// Tech tree location for a config read from `config_path`.
    ///
    /// Relative tree paths resolve against the config's directory.
    #[must_use]
    pub fn tech_tree_location(&self, config_path: &Path) -> PathBuf {
        if self.tech_tree_path.is_absolute() {
            return self.tech_tree_path.clone();
        }
        config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.tech_tree_path)
    }
}
