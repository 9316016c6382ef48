//! Configuration for worktrail.
//!
//! ## config.kdl - User preferences
//!
//! Located at `~/.config/worktrail/config.kdl`, or under `$WT_CONFIG_DIR`.
//!
//! Contains:
//! - `user` - Name booked on work intervals
//! - `git-timeout` - Seconds allowed for one git invocation
//! - `attribution` - Co-author trailer for WIP export commits
//! - `output-format` - "json" or "human"
//! - `workspace "<name>" "<path>"` - Named root directories (repeatable)
//!
//! ## Precedence
//!
//! CLI flag > environment variable > config.kdl > defaults.
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, Resolved, ResolvedConfig, ValueSource, agent_session_id, resolve_config,
};
pub use schema::{OutputFormat, Workspace, WorktrailConfig};

use std::fs;
use std::path::{Path, PathBuf};

use kdl::KdlDocument;
use tracing::debug;

use crate::{Error, Result};

pub const CONFIG_DIR_ENV: &str = "WT_CONFIG_DIR";
pub const CONFIG_FILE: &str = "config.kdl";

/// Directory holding config.kdl.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::config_dir()
        .map(|d| d.join("worktrail"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Read config.kdl; a missing file yields the empty config.
pub fn load_config(path: &Path) -> Result<WorktrailConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file");
        return Ok(WorktrailConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    Ok(WorktrailConfig::from_kdl(&doc))
}

/// Write config.kdl, creating its directory.
pub fn save_config(path: &Path, config: &WorktrailConfig) -> Result<()> {
    config.validate().map_err(Error::Config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_kdl().to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_is_default() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, WorktrailConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILE);
        let mut config = WorktrailConfig::new();
        config.set("user", "dana").unwrap();
        config.set("workspace.oss", "/home/dana/oss").unwrap();

        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_kdl() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "user \"unterminated").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Config(_))));
    }
}
