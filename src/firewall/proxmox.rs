//! Proxmox firewall backend.
//!
//! Creates per-address drop rules through the Proxmox HTTP API, at node
//! level or for a single VM when a VMID is configured. Rule positions
//! returned by the API are remembered per address so unban can delete
//! them again.

use super::{http_client, is_ipv6, validate_ip, Backend, BackendError};
use crate::config::ProxmoxConfig;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Applies bans through the Proxmox firewall API.
pub struct ProxmoxBackend {
    config: ProxmoxConfig,
    client: reqwest::Client,
    token: CancellationToken,
    /// ip -> firewall rule positions, needed for targeted deletes.
    rules: Mutex<HashMap<String, Vec<i64>>>,
}

#[derive(Debug, Deserialize)]
struct BanResponse {
    #[serde(default)]
    data: Option<PosData>,
}

#[derive(Debug, Default, Deserialize)]
struct PosData {
    #[serde(default)]
    pos: i64,
}

impl ProxmoxBackend {
    pub fn new(config: &ProxmoxConfig, token: CancellationToken) -> Self {
        Self {
            config: config.clone(),
            client: http_client(),
            token,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Target scope for logging: the node, or a VM on it.
    fn scope(&self) -> String {
        match &self.config.vmid {
            Some(vmid) => format!("vm:{vmid}"),
            None => "node".to_string(),
        }
    }

    /// Build `{api_url}/nodes/{node}[/qemu/{vmid}]/firewall/rules[/{pos}]`.
    fn rules_url(&self, pos: Option<i64>) -> Result<Url, BackendError> {
        let mut url = Url::parse(&self.config.api_url)
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::InvalidUrl(self.config.api_url.clone()))?;
            segments.pop_if_empty();
            segments.push("nodes");
            segments.push(&self.config.node);
            if let Some(vmid) = &self.config.vmid {
                segments.push("qemu");
                segments.push(vmid);
            }
            segments.push("firewall");
            segments.push("rules");
            if let Some(pos) = pos {
                segments.push(&pos.to_string());
            }
        }
        Ok(url)
    }

    fn auth_header(&self) -> String {
        format!(
            "PVEAPIToken={}={}",
            self.config.token_id, self.config.token_secret
        )
    }
}

#[async_trait]
impl Backend for ProxmoxBackend {
    async fn ban(
        &self,
        ip: &str,
        duration: Duration,
        reason: &str,
        rule_id: &str,
    ) -> Result<(), BackendError> {
        let addr = validate_ip(ip)?;
        let subnet_size = if is_ipv6(&addr) { "128" } else { "32" };

        info!(
            ip,
            rule = rule_id,
            reason,
            scope = %self.scope(),
            node = %self.config.node,
            duration = %humantime::format_duration(duration),
            "proxmox ban"
        );

        let url = self.rules_url(None)?;
        let source = format!("{ip}/{subnet_size}");
        let comment = format!("foxhole-fw:{rule_id}");
        let form = [
            ("type", "in"),
            ("action", "drop"),
            ("enable", "1"),
            ("source", source.as_str()),
            ("comment", comment.as_str()),
        ];
        let request = self
            .client
            .post(url)
            .header("Authorization", self.auth_header())
            .form(&form);

        let response = tokio::select! {
            _ = self.token.cancelled() => return Err(BackendError::Cancelled),
            response = request.send() => response?,
        };

        if response.status().as_u16() >= 300 {
            return Err(BackendError::UnexpectedStatus {
                backend: "proxmox",
                status: response.status(),
            });
        }

        // A missing or malformed position only costs the targeted delete
        // later; the ban itself succeeded.
        match response.json::<BanResponse>().await {
            Ok(body) => {
                let pos = body.data.map(|d| d.pos).unwrap_or_default();
                if pos > 0 {
                    self.rules
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .entry(ip.to_string())
                        .or_default()
                        .push(pos);
                }
            }
            Err(e) => {
                error!(ip, error = %e, "proxmox: failed to decode rule response");
            }
        }
        Ok(())
    }

    async fn unban(&self, ip: &str) -> Result<(), BackendError> {
        validate_ip(ip)?;

        info!(ip, scope = %self.scope(), node = %self.config.node, "proxmox unban");

        let positions = self
            .rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(ip)
            .unwrap_or_default();

        if positions.is_empty() {
            info!(ip, "proxmox unban: no recorded rules");
            return Ok(());
        }

        for pos in positions {
            let url = match self.rules_url(Some(pos)) {
                Ok(url) => url,
                Err(e) => {
                    error!(ip, pos, error = %e, "proxmox: bad delete url");
                    continue;
                }
            };
            let request = self
                .client
                .delete(url)
                .header("Authorization", self.auth_header());

            let response = tokio::select! {
                _ = self.token.cancelled() => return Err(BackendError::Cancelled),
                response = request.send() => response,
            };
            match response {
                Ok(response) if response.status().as_u16() >= 300 => {
                    error!(ip, pos, status = %response.status(), "proxmox: delete rule failed");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(ip, pos, error = %e, "proxmox: delete request failed");
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "proxmox"
    }
}
