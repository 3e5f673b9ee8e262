//! Data validation utilities.
//!
//! Checks tech tree and game config RON files and collects every problem
//! found, rather than stopping at the first one the way loading does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use glest_core::catalog::{Catalog, TechTreeData};
use glest_core::config::GameConfig;
use glest_core::simulation::Simulation;

/// Errors that stop validation altogether.
#[derive(Debug, Error)]
pub enum ValidateError {
    /// A file or directory could not be read.
    #[error("cannot read '{path}': {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// What a data file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// A `TechTreeData` document.
    TechTree,
    /// A `GameConfig` document.
    GameConfig,
}

/// Validation outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// File checked.
    pub path: PathBuf,
    /// Detected content, if recognised.
    pub kind: Option<DataKind>,
    /// Every problem found; empty when the file is valid.
    pub problems: Vec<String>,
}

impl FileReport {
    /// Whether the file passed.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

fn read(path: &Path) -> Result<String, ValidateError> {
    fs::read_to_string(path).map_err(|source| ValidateError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn detect(source: &str) -> Option<DataKind> {
    let tree = source.find("TechTreeData");
    let config = source.find("GameConfig");
    match (tree, config) {
        (Some(t), Some(c)) if c < t => Some(DataKind::GameConfig),
        (Some(_), _) => Some(DataKind::TechTree),
        (None, Some(_)) => Some(DataKind::GameConfig),
        (None, None) => None,
    }
}

/// Every reference problem in a tech tree document.
pub fn check_tech_tree(source: &str) -> Vec<String> {
    match ron::from_str::<TechTreeData>(source) {
        Ok(data) => Catalog::check_data(data)
            .into_iter()
            .map(|e| e.to_string())
            .collect(),
        Err(e) => vec![format!("parse error: {e}")],
    }
}

/// Problems with a game config, including building the world it describes
/// against its tech tree.
fn check_game_config(source: &str, path: &Path) -> Vec<String> {
    let config = match GameConfig::from_ron_str(source, &path.display().to_string()) {
        Ok(config) => config,
        Err(e) => return vec![e.to_string()],
    };
    let tree_path = config.tech_tree_location(path);
    let tree = match fs::read_to_string(&tree_path) {
        Ok(tree) => tree,
        Err(e) => return vec![format!("tech tree '{}': {e}", tree_path.display())],
    };
    let catalog = match Catalog::from_ron_str(&tree, &tree_path.display().to_string()) {
        Ok(catalog) => catalog,
        Err(_) => {
            let count = check_tech_tree(&tree).len().max(1);
            return vec![format!(
                "tech tree '{}' has {count} problem(s)",
                tree_path.display()
            )];
        }
    };
    match Simulation::new(&config, Arc::new(catalog)) {
        Ok(_) => Vec::new(),
        Err(e) => vec![e.to_string()],
    }
}

/// Validate one RON file.
///
/// # Errors
///
/// [`ValidateError::Io`] if the file cannot be read.
pub fn validate_file(path: &Path) -> Result<FileReport, ValidateError> {
    let source = read(path)?;
    let kind = detect(&source);
    let problems = match kind {
        Some(DataKind::TechTree) => check_tech_tree(&source),
        Some(DataKind::GameConfig) => check_game_config(&source, path),
        None => vec!["not a TechTreeData or GameConfig document".to_string()],
    };
    tracing::debug!(path = %path.display(), ?kind, problems = problems.len(), "checked");
    Ok(FileReport {
        path: path.to_path_buf(),
        kind,
        problems,
    })
}

/// Validate a file, or every `.ron` file in a directory in name order.
///
/// # Errors
///
/// [`ValidateError::Io`] if a path cannot be read.
pub fn validate_path(path: &Path) -> Result<Vec<FileReport>, ValidateError> {
    if !path.is_dir() {
        return validate_file(path).map(|report| vec![report]);
    }
    let entries = fs::read_dir(path).map_err(|source| ValidateError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "ron"))
        .collect();
    files.sort();
    files.iter().map(|file| validate_file(file)).collect()
}
