use std::path::{Path, PathBuf};
use merge::Merge;
use serde::Deserialize;
use thiserror::Error;

/// A custom merge strategy for `Option<T>` fields. It overwrites the destination
/// (`left`) with the source (`right`) only if the source is `Some`.
fn overwrite_if_some<T>(left: &mut Option<T>, right: Option<T>) {
    if right.is_some() {
        *left = right;
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at any of the expected locations")]
    NotFound,
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize, Merge, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub log_level: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub default_username: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub port_wait_attempts: Option<u32>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub aws_cli: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub aws_profile: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub aws_region: Option<String>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub syntax_error_exit_code: Option<i32>,
    #[merge(strategy = overwrite_if_some)]
    #[serde(default)]
    pub context_store_path: Option<String>,
}

impl Config {
    /// A config with every field unset, used as the neutral merge layer.
    pub fn empty() -> Self {
        Self {
            log_level: None,
            ssh_port: None,
            default_username: None,
            connect_timeout_ms: None,
            port_wait_attempts: None,
            aws_cli: None,
            aws_profile: None,
            aws_region: None,
            syntax_error_exit_code: None,
            context_store_path: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            ssh_port: Some(22),
            default_username: Some("fsxadmin".to_string()),
            connect_timeout_ms: Some(20_000),
            port_wait_attempts: Some(15),
            aws_cli: Some("aws".to_string()),
            aws_profile: None,
            aws_region: None,
            syntax_error_exit_code: Some(255),
            context_store_path: Some("~/.ontapexec/contexts.json".to_string()),
        }
    }
}

pub trait ConfigService {
    fn load_from_paths(explicit: Option<&Path>) -> Result<Config, ConfigError>;
    fn expand_tilde<P: AsRef<Path>>(path: P) -> Option<PathBuf>;
}
