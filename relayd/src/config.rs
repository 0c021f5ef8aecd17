// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Immutable configuration snapshot, loaded once before startup.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/relayd.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Relay identity, used in log lines, replies and container names.
    pub id: String,

    /// Number of workers. The request queue holds twice as many.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// `stdout`, `console`, `stderr` or a file path.
    #[serde(default = "default_log_path")]
    pub log_path: String,

    pub bus: BusConfig,

    #[serde(default)]
    pub container: ContainerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    pub socket_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub engine: Engine,

    /// Overrides the engine's binary name.
    #[serde(default)]
    pub binary: Option<String>,

    /// Image used by payloads that do not name one.
    #[serde(default)]
    pub default_image: Option<String>,

    /// Appended to every `run` invocation, before the image.
    #[serde(default)]
    pub extra_run_args: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine: Engine::default(),
            binary: None,
            default_image: None,
            extra_run_args: Vec::new(),
        }
    }
}

impl ContainerConfig {
    pub fn binary(&self) -> &str {
        self.binary
            .as_deref()
            .unwrap_or_else(|| self.engine.default_binary())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Podman,
    Docker,
}

impl Engine {
    pub fn default_binary(&self) -> &'static str {
        match self {
            Engine::Podman => "podman",
            Engine::Docker => "docker",
        }
    }
}

fn default_max_concurrent() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_path() -> String {
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// One entry per problem, for reporting line by line.
    pub fn problems(&self) -> Vec<String> {
        match self {
            ConfigError::Invalid(problems) => problems.clone(),
            other => vec![other.to_string()],
        }
    }
}

fn relay_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap_or_else(|e| panic!("bad id regex: {e}"))
    })
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Collects every problem rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.id.trim().is_empty() {
            problems.push("id must not be empty".to_string());
        } else if !relay_id_pattern().is_match(&self.id) {
            problems.push(format!(
                "id '{}' may only contain letters, digits, '.', '_' and '-'",
                self.id
            ));
        }
        if self.max_concurrent == 0 {
            problems.push("max_concurrent must be at least 1".to_string());
        }
        if self.bus.socket_path.as_os_str().is_empty() {
            problems.push("bus.socket_path must not be empty".to_string());
        }
        if self.log_path.trim().is_empty() {
            problems.push("log_path must not be empty".to_string());
        }
        if self.container.enabled && self.container.binary().trim().is_empty() {
            problems.push("container.binary must not be empty when the backend is enabled".to_string());
        }
        if let Some(image) = &self.container.default_image {
            if image.trim().is_empty() || image.starts_with('-') {
                problems.push(format!("container.default_image '{image}' is not an image reference"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    /// Parses and validates.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
