//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`WT_USER`, `WT_GIT_TIMEOUT`, `WT_DATA_DIR`)
//! 3. config.kdl
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{OutputFormat, Workspace, WorktrailConfig};
use crate::git::DEFAULT_TIMEOUT;
use crate::{Error, Result};

pub const USER_ENV: &str = "WT_USER";
pub const GIT_TIMEOUT_ENV: &str = "WT_GIT_TIMEOUT";
pub const DATA_DIR_ENV: &str = "WT_DATA_DIR";
pub const AGENT_SESSION_ENV: &str = "WT_AGENT_SESSION_ID";
/// Fallback conversation id exported by the agent's shell
pub const CLAUDE_SESSION_ENV: &str = "CLAUDE_SESSION_ID";

/// Co-author trailer used when none is configured.
pub const DEFAULT_ATTRIBUTION: &str = "Claude <noreply@anthropic.com>";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub user: Resolved<String>,
    pub git_timeout: Resolved<Duration>,
    pub attribution: Resolved<String>,
    pub output_format: Resolved<OutputFormat>,
    pub data_dir: Resolved<PathBuf>,
    pub workspaces: Vec<Workspace>,
}

impl ResolvedConfig {
    /// The workspace whose path is the closest ancestor of `path`.
    pub fn workspace_for_path(&self, path: &Path) -> Option<&Workspace> {
        self.workspaces
            .iter()
            .filter(|w| path.starts_with(&w.path))
            .max_by_key(|w| w.path.components().count())
    }

    pub fn workspace(&self, name: &str) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.name == name)
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub data_dir: Option<PathBuf>,
    pub user: Option<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve configuration with full precedence chain.
pub fn resolve_config(file: &WorktrailConfig, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    file.validate().map_err(Error::Config)?;

    // Resolve user
    let user = if let Some(ref user) = overrides.user {
        Resolved::new(user.clone(), ValueSource::CliFlag)
    } else if let Some(user) = env_value(USER_ENV) {
        Resolved::new(user, ValueSource::EnvVar(USER_ENV.to_string()))
    } else if let Some(ref user) = file.user {
        Resolved::new(user.clone(), ValueSource::ConfigFile)
    } else {
        let login = env_value("USER")
            .or_else(|| env_value("USERNAME"))
            .unwrap_or_else(|| "unknown".to_string());
        Resolved::new(login, ValueSource::Default)
    };

    // Resolve git timeout
    let git_timeout = if let Some(raw) = env_value(GIT_TIMEOUT_ENV) {
        let secs = raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| {
                Error::Config(format!(
                    "{} must be a positive number of seconds, got '{}'",
                    GIT_TIMEOUT_ENV, raw
                ))
            })?;
        Resolved::new(
            Duration::from_secs(secs),
            ValueSource::EnvVar(GIT_TIMEOUT_ENV.to_string()),
        )
    } else if let Some(secs) = file.git_timeout {
        Resolved::new(Duration::from_secs(secs), ValueSource::ConfigFile)
    } else {
        Resolved::new(DEFAULT_TIMEOUT, ValueSource::Default)
    };

    // Resolve attribution
    let attribution = match file.attribution {
        Some(ref attribution) => Resolved::new(attribution.clone(), ValueSource::ConfigFile),
        None => Resolved::new(DEFAULT_ATTRIBUTION.to_string(), ValueSource::Default),
    };

    // Resolve output format
    let output_format = if let Some(format) = overrides.output_format {
        Resolved::new(format, ValueSource::CliFlag)
    } else if let Some(format) = file.output_format {
        Resolved::new(format, ValueSource::ConfigFile)
    } else {
        Resolved::new(OutputFormat::Json, ValueSource::Default)
    };

    // Resolve data directory
    let data_dir = if let Some(ref dir) = overrides.data_dir {
        Resolved::new(dir.clone(), ValueSource::CliFlag)
    } else if let Some(dir) = env_value(DATA_DIR_ENV) {
        Resolved::new(PathBuf::from(dir), ValueSource::EnvVar(DATA_DIR_ENV.to_string()))
    } else {
        let base = dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;
        Resolved::new(base.join("worktrail"), ValueSource::Default)
    };

    Ok(ResolvedConfig {
        user,
        git_timeout,
        attribution,
        output_format,
        data_dir,
        workspaces: file.workspaces.clone(),
    })
}

/// The calling agent's conversation id, if the environment carries one.
pub fn agent_session_id() -> Option<Resolved<String>> {
    [AGENT_SESSION_ENV, CLAUDE_SESSION_ENV]
        .iter()
        .find_map(|name| {
            env_value(name).map(|v| Resolved::new(v, ValueSource::EnvVar(name.to_string())))
        })
}
