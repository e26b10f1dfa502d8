//! Vultr firewall backend.
//!
//! Creates per-address rules in a Vultr firewall group that block all TCP
//! and UDP ports. The provider-side rule ids are remembered per address so
//! unban can issue targeted deletes.

use super::{http_client, is_ipv6, validate_ip, Backend, BackendError};
use crate::config::VultrConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const VULTR_API_BASE: &str = "https://api.vultr.com/v2";

/// Applies bans through the Vultr firewall API.
pub struct VultrBackend {
    api_key: String,
    firewall_id: String,
    base_url: String,
    client: reqwest::Client,
    token: CancellationToken,
    /// ip -> provider-side rule ids, needed for targeted deletes.
    rules: Mutex<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Serialize)]
struct RuleRequest<'a> {
    direction: &'a str,
    ip_type: &'a str,
    protocol: &'a str,
    subnet: &'a str,
    subnet_size: u8,
    port: &'a str,
    notes: String,
}

#[derive(Debug, Deserialize)]
struct RuleResponse {
    #[serde(default)]
    firewall_rule: FirewallRule,
}

#[derive(Debug, Default, Deserialize)]
struct FirewallRule {
    #[serde(default)]
    id: String,
}

impl VultrBackend {
    pub fn new(config: &VultrConfig, token: CancellationToken) -> Self {
        Self::with_base_url(config, token, VULTR_API_BASE.to_string())
    }

    fn with_base_url(config: &VultrConfig, token: CancellationToken, base_url: String) -> Self {
        Self {
            api_key: config.api_key.clone(),
            firewall_id: config.firewall_id.clone(),
            base_url,
            client: http_client(),
            token,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Create one firewall rule and return its provider-side id.
    async fn create_rule(
        &self,
        ip: &str,
        ip_type: &str,
        subnet_size: u8,
        protocol: &str,
        rule_id: &str,
    ) -> Result<String, BackendError> {
        let payload = RuleRequest {
            direction: "in",
            ip_type,
            protocol,
            subnet: ip,
            subnet_size,
            port: "1-65535",
            notes: format!("foxhole-fw:{rule_id}"),
        };

        let url = format!("{}/firewalls/{}/rules", self.base_url, self.firewall_id);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload);

        let response = tokio::select! {
            _ = self.token.cancelled() => return Err(BackendError::Cancelled),
            response = request.send() => response?,
        };

        if response.status().as_u16() >= 300 {
            return Err(BackendError::UnexpectedStatus {
                backend: "vultr",
                status: response.status(),
            });
        }

        let body: RuleResponse = response.json().await?;
        Ok(body.firewall_rule.id)
    }
}

#[async_trait]
impl Backend for VultrBackend {
    async fn ban(
        &self,
        ip: &str,
        duration: Duration,
        reason: &str,
        rule_id: &str,
    ) -> Result<(), BackendError> {
        let addr = validate_ip(ip)?;
        let (ip_type, subnet_size) = if is_ipv6(&addr) { ("v6", 128) } else { ("v4", 32) };

        info!(
            ip,
            rule = rule_id,
            reason,
            firewall_id = %self.firewall_id,
            duration = %humantime::format_duration(duration),
            "vultr ban"
        );

        // One rule per protocol; the group has no "any" protocol.
        let mut created = Vec::new();
        for protocol in ["tcp", "udp"] {
            let id = self
                .create_rule(ip, ip_type, subnet_size, protocol, rule_id)
                .await?;
            if !id.is_empty() {
                created.push(id);
            }
        }

        if created.is_empty() {
            return Err(BackendError::NoRuleIds { ip: ip.to_string() });
        }

        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(ip.to_string())
            .or_default()
            .extend(created);
        Ok(())
    }

    async fn unban(&self, ip: &str) -> Result<(), BackendError> {
        validate_ip(ip)?;

        // The entry is dropped before the deletes run; failed deletes are
        // logged, not retried.
        let ids = self
            .rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(ip)
            .unwrap_or_default();

        if ids.is_empty() {
            info!(ip, "vultr unban: no rules recorded");
            return Ok(());
        }

        info!(ip, rules = ids.len(), "vultr unban");
        for id in ids {
            let url = format!(
                "{}/firewalls/{}/rules/{}",
                self.base_url, self.firewall_id, id
            );
            let request = self.client.delete(&url).bearer_auth(&self.api_key);

            let response = tokio::select! {
                _ = self.token.cancelled() => return Err(BackendError::Cancelled),
                response = request.send() => response,
            };
            match response {
                Ok(response) if response.status().as_u16() >= 300 => {
                    error!(ip, id = %id, status = %response.status(), "vultr: delete rule failed");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(ip, id = %id, error = %e, "vultr: delete request failed");
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "vultr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::testutil::serve;

    fn config() -> VultrConfig {
        VultrConfig {
            api_key: "key".to_string(),
            firewall_id: "fw-123".to_string(),
        }
    }

    fn body_of(raw: &str) -> serde_json::Value {
        serde_json::from_str(raw.split("\r\n\r\n").nth(1).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn ban_creates_tcp_and_udp_rules() {
        let (url, mut requests) = serve(vec![
            ("201 Created", r#"{"firewall_rule":{"id":"r-tcp"}}"#),
            ("201 Created", r#"{"firewall_rule":{"id":"r-udp"}}"#),
        ])
        .await;
        let backend = VultrBackend::with_base_url(&config(), CancellationToken::new(), url);

        backend
            .ban("1.2.3.4", Duration::from_secs(300), "max_errors exceeded", "login")
            .await
            .unwrap();

        let first = requests.recv().await.unwrap();
        assert!(first.starts_with("POST /firewalls/fw-123/rules HTTP/1.1"));
        let json = body_of(&first);
        assert_eq!(json["direction"], "in");
        assert_eq!(json["ip_type"], "v4");
        assert_eq!(json["protocol"], "tcp");
        assert_eq!(json["subnet"], "1.2.3.4");
        assert_eq!(json["subnet_size"], 32);
        assert_eq!(json["port"], "1-65535");
        assert_eq!(json["notes"], "foxhole-fw:login");

        let second = requests.recv().await.unwrap();
        assert_eq!(body_of(&second)["protocol"], "udp");

        let recorded = backend.rules.lock().unwrap().get("1.2.3.4").cloned();
        assert_eq!(recorded, Some(vec!["r-tcp".to_string(), "r-udp".to_string()]));
    }

    #[tokio::test]
    async fn ipv6_ban_uses_v6_subnet() {
        let (url, mut requests) = serve(vec![
            ("201 Created", r#"{"firewall_rule":{"id":"a"}}"#),
            ("201 Created", r#"{"firewall_rule":{"id":"b"}}"#),
        ])
        .await;
        let backend = VultrBackend::with_base_url(&config(), CancellationToken::new(), url);

        backend
            .ban("2001:db8::1", Duration::from_secs(60), "r", "id")
            .await
            .unwrap();

        let json = body_of(&requests.recv().await.unwrap());
        assert_eq!(json["ip_type"], "v6");
        assert_eq!(json["subnet_size"], 128);
    }

    #[tokio::test]
    async fn ban_fails_without_rule_ids() {
        let (url, _requests) = serve(vec![
            ("201 Created", r#"{"firewall_rule":{"id":""}}"#),
            ("201 Created", r#"{"firewall_rule":{"id":""}}"#),
        ])
        .await;
        let backend = VultrBackend::with_base_url(&config(), CancellationToken::new(), url);

        assert!(matches!(
            backend.ban("1.2.3.4", Duration::from_secs(60), "r", "id").await,
            Err(BackendError::NoRuleIds { .. })
        ));
    }

    #[tokio::test]
    async fn ban_fails_on_error_status() {
        let (url, _requests) = serve(vec![("401 Unauthorized", "{}")]).await;
        let backend = VultrBackend::with_base_url(&config(), CancellationToken::new(), url);

        assert!(matches!(
            backend.ban("1.2.3.4", Duration::from_secs(60), "r", "id").await,
            Err(BackendError::UnexpectedStatus { backend: "vultr", .. })
        ));
    }

    #[tokio::test]
    async fn unban_deletes_recorded_rules() {
        let (url, mut requests) = serve(vec![
            ("201 Created", r#"{"firewall_rule":{"id":"r-tcp"}}"#),
            ("201 Created", r#"{"firewall_rule":{"id":"r-udp"}}"#),
            ("204 No Content", ""),
            ("204 No Content", ""),
        ])
        .await;
        let backend = VultrBackend::with_base_url(&config(), CancellationToken::new(), url);

        backend
            .ban("1.2.3.4", Duration::from_secs(60), "r", "id")
            .await
            .unwrap();
        requests.recv().await.unwrap();
        requests.recv().await.unwrap();

        backend.unban("1.2.3.4").await.unwrap();
        let first = requests.recv().await.unwrap();
        assert!(first.starts_with("DELETE /firewalls/fw-123/rules/r-tcp HTTP/1.1"));
        let second = requests.recv().await.unwrap();
        assert!(second.starts_with("DELETE /firewalls/fw-123/rules/r-udp HTTP/1.1"));

        assert!(backend.rules.lock().unwrap().get("1.2.3.4").is_none());
    }

    #[tokio::test]
    async fn unban_without_recorded_rules_is_ok() {
        let backend = VultrBackend::with_base_url(
            &config(),
            CancellationToken::new(),
            "http://127.0.0.1:1".to_string(),
        );
        assert!(backend.unban("1.2.3.4").await.is_ok());
    }
}
