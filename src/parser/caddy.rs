//! Caddy v2 JSON access log parser.

use super::{Event, ParseError, Parser};
use chrono::{DateTime, Utc};
use serde::Deserialize;

// Caddy v2 logs structured JSON with fields like:
// {"request":{"remote_ip":"127.0.0.1","method":"GET","uri":"/"},"status":200,"ts":"2020-10-10T13:55:36.123Z"}
#[derive(Debug, Deserialize)]
struct CaddyLine {
    #[serde(default)]
    request: CaddyRequest,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct CaddyRequest {
    #[serde(default)]
    remote_ip: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    uri: String,
}

/// Parses Caddy v2 structured JSON access logs.
pub struct CaddyParser;

impl CaddyParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CaddyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for CaddyParser {
    fn parse(&self, line: &str) -> Result<Event, ParseError> {
        let parsed: CaddyLine =
            serde_json::from_str(line).map_err(|source| ParseError::InvalidJson {
                parser: "caddy",
                source,
            })?;

        // A line without a usable ts still counts; evaluation falls back to
        // arrival time.
        let timestamp = parsed.ts.unwrap_or_else(Utc::now);

        Ok(Event {
            remote_addr: parsed.request.remote_ip,
            method: parsed.request.method,
            path: parsed.request.uri,
            status: parsed.status,
            timestamp: Some(timestamp),
            raw: line.to_string(),
        })
    }
}
