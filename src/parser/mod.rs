//! Log line parsing.
//!
//! A [`Parser`] turns one raw access-log line into a normalized [`Event`].
//! Four formats are supported, selected by name in the configuration:
//! `nginx_combined`, `apache_common`, `caddy`, and `traefik`.
//!
//! Parse errors are per-line and non-fatal; the pipeline logs them and
//! drops the line.

mod apache;
mod caddy;
mod nginx;
mod traefik;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use apache::ApacheCommonParser;
pub use caddy::CaddyParser;
pub use nginx::NginxCombinedParser;
pub use traefik::TraefikParser;

/// A normalized HTTP request extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Source address as it appeared in the log. Syntactically an IP, but
    /// not validated here; backends validate before touching the wire.
    pub remote_addr: String,
    /// Upper-case method token.
    pub method: String,
    /// Request path, matched exactly against rules.
    pub path: String,
    /// Three-digit response status.
    pub status: u16,
    /// Request time; `None` when the line carried no usable timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// The original line, kept for diagnostics.
    pub raw: String,
}

/// Errors from log line parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unknown parser {0:?}")]
    UnknownParser(String),
    #[error("{parser} parser: line does not match expected format")]
    Malformed { parser: &'static str },
    #[error("{parser} parser: invalid timestamp: {source}")]
    InvalidTime {
        parser: &'static str,
        #[source]
        source: chrono::ParseError,
    },
    #[error("{parser} parser: invalid json: {source}")]
    InvalidJson {
        parser: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Implemented by log parsers.
pub trait Parser: Send + Sync {
    fn parse(&self, line: &str) -> Result<Event, ParseError>;
}

/// Return a parser implementation by name.
pub fn by_name(name: &str) -> Result<Box<dyn Parser>, ParseError> {
    match name {
        "nginx_combined" | "nginx" => Ok(Box::new(NginxCombinedParser::new())),
        "apache_common" | "apache" => Ok(Box::new(ApacheCommonParser::new())),
        "caddy" => Ok(Box::new(CaddyParser::new())),
        "traefik" => Ok(Box::new(TraefikParser::new())),
        other => Err(ParseError::UnknownParser(other.to_string())),
    }
}
