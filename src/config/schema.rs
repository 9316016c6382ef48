//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The [`WorktrailConfig`] struct mirroring the file
//! - Conversion to and from KDL documents
//! - Validation and per-key updates for `wt config set`

use std::path::PathBuf;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named root directory that sessions can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    pub path: PathBuf,
}

/// Keys accepted by `wt config set`.
pub const SETTABLE_KEYS: &[&str] = &[
    "user",
    "git-timeout",
    "attribution",
    "output-format",
    "workspace.<name>",
];

/// User preferences stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// user "alice"
/// git-timeout 60
/// attribution "Claude <noreply@anthropic.com>"
/// output-format "human"  // or "json"
/// workspace "primary" "/home/alice/src"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktrailConfig {
    /// Name booked on work intervals
    pub user: Option<String>,

    /// Seconds allowed for a single git invocation
    pub git_timeout: Option<u64>,

    /// Co-author trailer for WIP export commits
    pub attribution: Option<String>,

    pub output_format: Option<OutputFormat>,

    pub workspaces: Vec<Workspace>,
}

fn first_string(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .and_then(|entry| entry.value().as_string())
        .map(str::to_string)
}

fn string_node(name: &str, value: &str) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value.to_string())));
    node
}

impl WorktrailConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> Result<(), String> {
        if self.git_timeout == Some(0) {
            return Err("git-timeout must be at least 1 second".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for workspace in &self.workspaces {
            if !seen.insert(workspace.name.as_str()) {
                return Err(format!("workspace '{}' is defined twice", workspace.name));
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.user = first_string(doc, "user");
        config.attribution = first_string(doc, "attribution");
        config.output_format = first_string(doc, "output-format").and_then(|s| OutputFormat::parse(&s));

        if let Some(node) = doc.get("git-timeout") {
            if let Some(entry) = node.entries().first() {
                if let Some(secs) = entry.value().as_integer() {
                    if secs > 0 {
                        config.git_timeout = u64::try_from(secs).ok();
                    }
                }
            }
        }

        // Every `workspace "<name>" "<path>"` node
        for node in doc.nodes() {
            if node.name().value() != "workspace" {
                continue;
            }
            let mut values = node.entries().iter().filter_map(|e| e.value().as_string());
            if let (Some(name), Some(path)) = (values.next(), values.next()) {
                config.workspaces.push(Workspace {
                    name: name.to_string(),
                    path: PathBuf::from(path),
                });
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref user) = self.user {
            doc.nodes_mut().push(string_node("user", user));
        }

        if let Some(secs) = self.git_timeout {
            let mut node = KdlNode::new("git-timeout");
            node.push(KdlEntry::new(KdlValue::Integer(secs as i128)));
            doc.nodes_mut().push(node);
        }

        if let Some(ref attribution) = self.attribution {
            doc.nodes_mut().push(string_node("attribution", attribution));
        }

        if let Some(format) = self.output_format {
            doc.nodes_mut().push(string_node("output-format", format.as_str()));
        }

        for workspace in &self.workspaces {
            let mut node = string_node("workspace", &workspace.name);
            node.push(KdlEntry::new(KdlValue::String(
                workspace.path.display().to_string(),
            )));
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Set one key from its string form.
    ///
    /// An empty value clears the key (or removes the workspace).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        let clear = value.is_empty();

        match key {
            "user" => self.user = (!clear).then(|| value.to_string()),
            "attribution" => self.attribution = (!clear).then(|| value.to_string()),
            "git-timeout" => {
                self.git_timeout = if clear {
                    None
                } else {
                    match value.parse::<u64>() {
                        Ok(secs) if secs > 0 => Some(secs),
                        _ => {
                            return Err(format!(
                                "git-timeout must be a positive number of seconds, got '{}'",
                                value
                            ));
                        }
                    }
                };
            }
            "output-format" => {
                self.output_format = if clear {
                    None
                } else {
                    Some(OutputFormat::parse(value).ok_or_else(|| {
                        format!("output-format must be 'json' or 'human', got '{}'", value)
                    })?)
                };
            }
            _ => {
                let Some(name) = key.strip_prefix("workspace.").filter(|n| !n.is_empty()) else {
                    return Err(format!(
                        "Unknown config key '{}'. Valid keys: {}",
                        key,
                        SETTABLE_KEYS.join(", ")
                    ));
                };
                self.workspaces.retain(|w| w.name != name);
                if !clear {
                    self.workspaces.push(Workspace {
                        name: name.to_string(),
                        path: PathBuf::from(value),
                    });
                }
            }
        }
        Ok(())
    }
}
