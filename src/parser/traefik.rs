//! Traefik JSON access log parser.

use super::{Event, ParseError, Parser};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::SocketAddr;

// Traefik access logs in JSON (common pattern):
// {"ClientAddr":"127.0.0.1:54321","ClientHost":"127.0.0.1","DownstreamStatus":200,"RequestMethod":"GET","RequestPath":"/","StartUTC":"2020-10-10T13:55:36.123Z"}
#[derive(Debug, Deserialize)]
struct TraefikLine {
    #[serde(default, rename = "ClientAddr")]
    client_addr: String,
    #[serde(default, rename = "ClientHost")]
    client_host: String,
    #[serde(default, rename = "DownstreamStatus")]
    downstream_status: u16,
    #[serde(default, rename = "RequestMethod")]
    request_method: String,
    #[serde(default, rename = "RequestPath")]
    request_path: String,
    #[serde(default, rename = "StartUTC")]
    start_utc: String,
}

/// Parses Traefik JSON access logs.
pub struct TraefikParser;

impl TraefikParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TraefikParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for TraefikParser {
    fn parse(&self, line: &str) -> Result<Event, ParseError> {
        let parsed: TraefikLine =
            serde_json::from_str(line).map_err(|source| ParseError::InvalidJson {
                parser: "traefik",
                source,
            })?;

        let timestamp = DateTime::parse_from_rfc3339(&parsed.start_utc)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let remote_addr = if parsed.client_host.is_empty() {
            host_of(&parsed.client_addr)
        } else {
            parsed.client_host
        };

        Ok(Event {
            remote_addr,
            method: parsed.request_method,
            path: parsed.request_path,
            status: parsed.downstream_status,
            timestamp: Some(timestamp),
            raw: line.to_string(),
        })
    }
}

/// Extract the host part of an "ip:port" address, handling bracketed IPv6.
/// A bare address without a port is returned as-is.
fn host_of(addr: &str) -> String {
    match addr.parse::<SocketAddr>() {
        Ok(sock) => sock.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}
