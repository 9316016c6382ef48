//! `wt config` commands.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{CommandContext, Output, json};
use crate::Result;
use crate::config::{self, Workspace, WorktrailConfig};

/// One resolved value and where it came from.
#[derive(Serialize)]
pub struct ConfigValue {
    pub key: &'static str,
    pub value: String,
    pub source: String,
}

#[derive(Serialize)]
pub struct ConfigShown {
    pub path: PathBuf,
    pub exists: bool,
    pub values: Vec<ConfigValue>,
    pub workspaces: Vec<Workspace>,
}

impl Output for ConfigShown {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let missing = if self.exists { "" } else { " (not created yet)" };
        let mut lines = vec![format!("Config file: {}{}", self.path.display(), missing)];
        for v in &self.values {
            lines.push(format!("  {} = {}  [{}]", v.key, v.value, v.source));
        }
        if self.workspaces.is_empty() {
            lines.push("  (no workspaces)".to_string());
        }
        for w in &self.workspaces {
            lines.push(format!("  workspace {} = {}", w.name, w.path.display()));
        }
        lines.join("\n")
    }
}

/// The resolved configuration with the source of every value.
pub fn config_show(ctx: &CommandContext, path: &Path) -> ConfigShown {
    let c = &ctx.config;
    let values = vec![
        ConfigValue {
            key: "user",
            value: c.user.value.clone(),
            source: c.user.source.to_string(),
        },
        ConfigValue {
            key: "git-timeout",
            value: c.git_timeout.value.as_secs().to_string(),
            source: c.git_timeout.source.to_string(),
        },
        ConfigValue {
            key: "attribution",
            value: c.attribution.value.clone(),
            source: c.attribution.source.to_string(),
        },
        ConfigValue {
            key: "output-format",
            value: c.output_format.value.to_string(),
            source: c.output_format.source.to_string(),
        },
        ConfigValue {
            key: "data-dir",
            value: c.data_dir.value.display().to_string(),
            source: c.data_dir.source.to_string(),
        },
    ];
    ConfigShown {
        path: path.to_path_buf(),
        exists: path.exists(),
        values,
        workspaces: c.workspaces.clone(),
    }
}

#[derive(Serialize)]
pub struct ConfigUpdated {
    pub path: PathBuf,
    pub key: String,
    /// `None` when the key was cleared
    pub value: Option<String>,
    pub config: WorktrailConfig,
}

impl Output for ConfigUpdated {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match &self.value {
            Some(value) => format!("Set {} = {} in {}", self.key, value, self.path.display()),
            None => format!("Cleared {} in {}", self.key, self.path.display()),
        }
    }
}

/// Edit one key of config.kdl at `path`.
pub fn config_set(path: &Path, key: &str, value: &str) -> Result<ConfigUpdated> {
    let mut file = config::load_config(path)?;
    file.set(key, value).map_err(crate::Error::Config)?;
    config::save_config(path, &file)?;

    let value = value.trim();
    Ok(ConfigUpdated {
        path: path.to_path_buf(),
        key: key.to_string(),
        value: (!value.is_empty()).then(|| value.to_string()),
        config: file,
    })
}
