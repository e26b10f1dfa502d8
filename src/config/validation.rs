//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early; the
//! same checks gate hot-reloads so a broken file never replaces a working
//! snapshot.

use super::{BackendKind, Config};
use std::time::Duration;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("log.path is required")]
    MissingLogPath,
    #[error("at least one rule is required")]
    NoRules,
    #[error("rule at index {0} is missing id")]
    RuleMissingId(usize),
    #[error("rule {0:?}: method is required")]
    RuleMissingMethod(String),
    #[error("rule {0:?}: path is required")]
    RuleMissingPath(String),
    #[error("rule {0:?}: max_errors must be > 0")]
    RuleZeroMaxErrors(String),
    #[error("rule {0:?}: window must be > 0")]
    RuleZeroWindow(String),
    #[error("rule {0:?}: ban_duration must be > 0")]
    RuleZeroBanDuration(String),
    #[error("backend.{0} must be set when backend.type={0}")]
    MissingBackendSettings(&'static str),
    #[error("backend.iptables.table and backend.iptables.chain are required")]
    IptablesIncomplete,
    #[error("backend.http_api.url is required")]
    HttpApiMissingUrl,
    #[error("backend.vultr.api_key and backend.vultr.firewall_id are required")]
    VultrIncomplete,
    #[error("backend.proxmox.api_url and backend.proxmox.node are required")]
    ProxmoxIncomplete,
}

/// Validate a configuration, returning the first error found.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.log.path.is_empty() {
        return Err(ValidationError::MissingLogPath);
    }

    match config.backend.kind {
        BackendKind::Iptables => {
            let settings = config
                .backend
                .iptables
                .as_ref()
                .ok_or(ValidationError::MissingBackendSettings("iptables"))?;
            if settings.table.is_empty() || settings.chain.is_empty() {
                return Err(ValidationError::IptablesIncomplete);
            }
        }
        BackendKind::HttpApi => {
            let settings = config
                .backend
                .http_api
                .as_ref()
                .ok_or(ValidationError::MissingBackendSettings("http_api"))?;
            if settings.url.is_empty() {
                return Err(ValidationError::HttpApiMissingUrl);
            }
        }
        BackendKind::Vultr => {
            let settings = config
                .backend
                .vultr
                .as_ref()
                .ok_or(ValidationError::MissingBackendSettings("vultr"))?;
            if settings.api_key.is_empty() || settings.firewall_id.is_empty() {
                return Err(ValidationError::VultrIncomplete);
            }
        }
        BackendKind::Proxmox => {
            let settings = config
                .backend
                .proxmox
                .as_ref()
                .ok_or(ValidationError::MissingBackendSettings("proxmox"))?;
            if settings.api_url.is_empty() || settings.node.is_empty() {
                return Err(ValidationError::ProxmoxIncomplete);
            }
        }
    }

    if config.rules.is_empty() {
        return Err(ValidationError::NoRules);
    }

    for (index, rule) in config.rules.iter().enumerate() {
        if rule.id.is_empty() {
            return Err(ValidationError::RuleMissingId(index));
        }
        if rule.method.is_empty() {
            return Err(ValidationError::RuleMissingMethod(rule.id.clone()));
        }
        if rule.path.is_empty() {
            return Err(ValidationError::RuleMissingPath(rule.id.clone()));
        }
        if rule.max_errors == 0 {
            return Err(ValidationError::RuleZeroMaxErrors(rule.id.clone()));
        }
        if rule.window == Duration::ZERO {
            return Err(ValidationError::RuleZeroWindow(rule.id.clone()));
        }
        if rule.ban_duration == Duration::ZERO {
            return Err(ValidationError::RuleZeroBanDuration(rule.id.clone()));
        }
    }

    Ok(())
}
