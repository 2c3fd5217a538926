//! Storage Layer
//!
//! Persists quest progress (attempt counters, completed challenges) as a
//! small JSON key-value file in the application data directory.

pub mod progress;
pub mod store;

pub use progress::ChallengeCompletion;
pub use store::ProgressStore;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Progress store file name inside the data directory
const STORE_FILE: &str = "progress.json";
/// Configuration file name inside the config directory
const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "questverifier", "QuestVerifier")
        .ok_or_else(|| anyhow::anyhow!("No home directory to keep quest progress in"))
}

/// Default progress store location; its directory is created on demand
pub fn default_store_path() -> Result<PathBuf> {
    file_in(project_dirs()?.data_dir(), STORE_FILE)
}

/// Default configuration file location.
///
/// The file itself is optional, so only the path is returned.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

/// `dir/file_name`, creating `dir` if needed
fn file_in(dir: &Path, file_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join(file_name))
}
