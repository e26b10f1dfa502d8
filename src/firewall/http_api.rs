//! Generic HTTP firewall API backend.
//!
//! POSTs a small JSON document to a single configured endpoint for both
//! ban and unban. Success is status-only: any 2xx is accepted regardless
//! of body.

use super::{http_client, validate_ip, Backend, BackendError};
use crate::config::HttpApiConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Calls a remote HTTP API to ban and unban addresses.
pub struct HttpApiBackend {
    url: String,
    auth_token: Option<String>,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    token: CancellationToken,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    /// "ban" or "unban".
    action: &'a str,
    ip: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_id: Option<&'a str>,
}

impl HttpApiBackend {
    pub fn new(config: &HttpApiConfig, token: CancellationToken) -> Self {
        Self {
            url: config.url.clone(),
            auth_token: config.auth_token.clone(),
            headers: config.headers.clone(),
            client: http_client(),
            token,
        }
    }

    async fn send(&self, payload: &ApiRequest<'_>) -> Result<(), BackendError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            _ = self.token.cancelled() => return Err(BackendError::Cancelled),
            response = request.send() => response?,
        };

        if response.status().as_u16() >= 300 {
            return Err(BackendError::UnexpectedStatus {
                backend: "http_api",
                status: response.status(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for HttpApiBackend {
    async fn ban(
        &self,
        ip: &str,
        duration: Duration,
        reason: &str,
        rule_id: &str,
    ) -> Result<(), BackendError> {
        validate_ip(ip)?;
        info!(
            ip,
            rule = rule_id,
            reason,
            duration = %humantime::format_duration(duration),
            "http_api ban"
        );
        let seconds = duration.as_secs();
        self.send(&ApiRequest {
            action: "ban",
            ip,
            duration_seconds: (seconds > 0).then_some(seconds),
            reason: (!reason.is_empty()).then_some(reason),
            rule_id: (!rule_id.is_empty()).then_some(rule_id),
        })
        .await
    }

    async fn unban(&self, ip: &str) -> Result<(), BackendError> {
        validate_ip(ip)?;
        info!(ip, "http_api unban");
        self.send(&ApiRequest {
            action: "unban",
            ip,
            duration_seconds: None,
            reason: None,
            rule_id: None,
        })
        .await
    }

    fn name(&self) -> &'static str {
        "http_api"
    }
}
