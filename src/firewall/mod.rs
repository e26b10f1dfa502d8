//! Firewall backends and ban management.
//!
//! A [`Backend`] converts ban/unban requests into concrete firewall state,
//! either in the local kernel (iptables) or through a remote REST API
//! (generic HTTP, Vultr, Proxmox). The [`BanManager`] sits in front of the
//! backend: it de-duplicates active bans, schedules expiry, and honors the
//! whitelist and dry-run settings.

mod banmanager;
mod http_api;
mod iptables;
mod proxmox;
mod util;
mod vultr;

use crate::config::{BackendKind, Config};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use banmanager::BanManager;
pub use http_api::HttpApiBackend;
pub use iptables::IptablesBackend;
pub use proxmox::ProxmoxBackend;
pub use util::{is_ipv6, validate_ip, WhitelistMatcher};
pub use vultr::VultrBackend;

/// Per-call timeout for remote backend requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from firewall backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("empty IP address")]
    EmptyIp,
    #[error("invalid IP address {0:?}")]
    InvalidIp(String),
    #[error("{command} failed with {status}: {output}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        output: String,
    },
    #[error("{command}: {source}")]
    CommandIo {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{backend}: unexpected status {status}")]
    UnexpectedStatus {
        backend: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("no firewall rule ids returned for {ip}")]
    NoRuleIds { ip: String },
    #[error("invalid api url: {0}")]
    InvalidUrl(String),
    #[error("backend.{0} settings missing")]
    MissingSettings(&'static str),
    #[error("operation cancelled")]
    Cancelled,
}

/// Implemented by firewall backends.
///
/// Implementations must validate the address with a strict parse before
/// touching the wire and must tolerate re-issuance: the caller guarantees
/// no concurrent overlapping call for the same address, but a ban may be
/// re-issued after a restart, and an unban may target state that is
/// already gone.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Install a rule that drops traffic from the given address.
    async fn ban(
        &self,
        ip: &str,
        duration: Duration,
        reason: &str,
        rule_id: &str,
    ) -> Result<(), BackendError>;

    /// Remove any rule previously created for the given address.
    async fn unban(&self, ip: &str) -> Result<(), BackendError>;

    /// Short identifier for logging.
    fn name(&self) -> &'static str;
}

/// Construct a backend from configuration.
///
/// The token is the root shutdown token; backends race in-flight work
/// against it so cancellation aborts at the next suspension point.
pub fn new_backend(
    config: &Config,
    token: CancellationToken,
) -> Result<Arc<dyn Backend>, BackendError> {
    match config.backend.kind {
        BackendKind::Iptables => {
            let settings = config
                .backend
                .iptables
                .as_ref()
                .ok_or(BackendError::MissingSettings("iptables"))?;
            Ok(Arc::new(IptablesBackend::new(settings, token)))
        }
        BackendKind::HttpApi => {
            let settings = config
                .backend
                .http_api
                .as_ref()
                .ok_or(BackendError::MissingSettings("http_api"))?;
            Ok(Arc::new(HttpApiBackend::new(settings, token)))
        }
        BackendKind::Vultr => {
            let settings = config
                .backend
                .vultr
                .as_ref()
                .ok_or(BackendError::MissingSettings("vultr"))?;
            Ok(Arc::new(VultrBackend::new(settings, token)))
        }
        BackendKind::Proxmox => {
            let settings = config
                .backend
                .proxmox
                .as_ref()
                .ok_or(BackendError::MissingSettings("proxmox"))?;
            Ok(Arc::new(ProxmoxBackend::new(settings, token)))
        }
    }
}

/// Build the shared HTTP client used by the REST backends.
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("foxhole-fw/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
