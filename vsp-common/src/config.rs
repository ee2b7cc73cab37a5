//! Configuration file discovery
//!
//! Resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/vsp/config.toml`)
//! 4. System-wide file (`/etc/vsp/config.toml`, Linux only)
//!
//! When nothing is found the caller falls back to built-in defaults.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Directory name used under the platform config directory
pub const APP_DIR: &str = "vsp";

/// File name of the bootstrap configuration
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Locate the configuration file to load.
///
/// An explicit path (CLI or environment) must exist; a missing explicit file
/// is an error rather than a silent fallback. Returns `Ok(None)` when no
/// explicit path was given and no platform file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf()).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_exists(PathBuf::from(path)).map(Some);
        }
    }

    // Priority 3/4: platform locations
    Ok(platform_config_candidates().into_iter().find(|p| p.exists()))
}

fn require_exists(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", path)))
    }
}

/// Candidate config file locations for this platform, most specific first
fn platform_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(APP_DIR).join(CONFIG_FILE_NAME));
    }

    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE_NAME));
    }

    candidates
}

/// Read a TOML file into any deserializable configuration type
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {:?}: {}", path, e)))
}
