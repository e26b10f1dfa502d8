//! Configuration loading and management.
//!
//! Configuration is read from a YAML file, validated at startup, and
//! published as an immutable snapshot through [`ConfigStore`]. A file
//! watcher re-reads the file on change and swaps the snapshot in one step;
//! readers pick up new rules on the next event they process.

mod store;
mod validation;
mod watcher;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use store::ConfigStore;
pub use validation::{validate, ValidationError};
pub use watcher::ConfigWatcher;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
}

/// Root configuration structure loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log verbosity and format.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// The webserver log being tailed.
    #[serde(default)]
    pub log: LogConfig,
    /// Rate-limit rules, evaluated in declared order.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Firewall backend selection and settings.
    pub backend: BackendConfig,
}

/// Controls daemon log verbosity and format.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Verbosity, e.g. "info" or "debug".
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit structured JSON instead of plain text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Describes the webserver log we are tailing.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Source file path, e.g. /var/log/nginx/access.log.
    #[serde(default)]
    pub path: String,
    /// Parser name, e.g. "nginx_combined".
    #[serde(default = "default_parser")]
    pub parser: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            parser: default_parser(),
        }
    }
}

/// A rule defines expected request properties and thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// Unique rule identifier.
    pub id: String,
    /// Optional human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Request method, e.g. GET or POST.
    pub method: String,
    /// Exact request path to match.
    pub path: String,
    /// Number of 4xx/5xx responses from the same address before banning.
    pub max_errors: u32,
    /// Rolling window the errors are counted over, e.g. "1m".
    #[serde(deserialize_with = "duration::deserialize")]
    pub window: Duration,
    /// How long to ban the address, e.g. "5m".
    #[serde(deserialize_with = "duration::deserialize")]
    pub ban_duration: Duration,
}

/// Which firewall backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Iptables,
    HttpApi,
    Vultr,
    Proxmox,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Iptables => "iptables",
            BackendKind::HttpApi => "http_api",
            BackendKind::Vultr => "vultr",
            BackendKind::Proxmox => "proxmox",
        }
    }
}

/// Selects and configures the firewall backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,

    pub iptables: Option<IptablesConfig>,
    pub http_api: Option<HttpApiConfig>,
    pub vultr: Option<VultrConfig>,
    pub proxmox: Option<ProxmoxConfig>,

    /// If true, do not actually ban/unban, just log the intent.
    #[serde(default)]
    pub dry_run: bool,
    /// Addresses or CIDR ranges that are never banned.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// iptables backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IptablesConfig {
    /// Target table, e.g. "filter".
    #[serde(default)]
    pub table: String,
    /// Target chain, e.g. "INPUT".
    #[serde(default)]
    pub chain: String,
}

/// Generic HTTP firewall API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpApiConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Vultr firewall backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VultrConfig {
    #[serde(default)]
    pub api_key: String,
    /// Firewall group ID the drop rules are created in.
    #[serde(default)]
    pub firewall_id: String,
}

/// Proxmox firewall backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxmoxConfig {
    /// e.g. https://proxmox.local:8006/api2/json
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub token_secret: String,
    #[serde(default)]
    pub node: String,
    /// Optional; if unset, rules apply at node level.
    #[serde(default)]
    pub vmid: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_parser() -> String {
    "nginx_combined".to_string()
}

impl Config {
    /// Read, parse, and validate configuration from the given path.
    ///
    /// Warns on the error stream if the file is world-readable, since it
    /// may contain API keys; this never fails the load.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(path) {
                let mode = meta.permissions().mode() & 0o777;
                if mode & 0o004 != 0 {
                    eprintln!(
                        "WARNING: config file {} is world-readable (mode {:o}). Consider: chmod 600 {}",
                        path.display(),
                        mode,
                        path.display()
                    );
                }
            }
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }
}

/// Serde adapter for humantime duration strings like "30s" or "5m".
mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
