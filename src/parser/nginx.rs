//! nginx combined log format parser.

use super::{Event, ParseError, Parser};
use chrono::{DateTime, Utc};
use regex::Regex;

// Example combined log line:
// 127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET /index.html HTTP/1.1" 200 2326 "-" "UserAgent"
const COMBINED_PATTERN: &str = r#"^(\S+) \S+ \S+ \[([^\]]+)\] "([A-Z]+) ([^"]*) HTTP/[0-9.]+" (\d{3}) \S+ "([^"]*)" "([^"]*)"$"#;

const TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Parses the nginx combined access log format.
pub struct NginxCombinedParser {
    re: Regex,
}

impl NginxCombinedParser {
    pub fn new() -> Self {
        Self {
            re: Regex::new(COMBINED_PATTERN).expect("combined log pattern is valid"),
        }
    }
}

impl Default for NginxCombinedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for NginxCombinedParser {
    fn parse(&self, line: &str) -> Result<Event, ParseError> {
        let captures = self
            .re
            .captures(line)
            .ok_or(ParseError::Malformed { parser: "nginx" })?;

        let timestamp = DateTime::parse_from_str(&captures[2], TIME_FORMAT)
            .map_err(|source| ParseError::InvalidTime {
                parser: "nginx",
                source,
            })?
            .with_timezone(&Utc);

        let status: u16 = captures[5]
            .parse()
            .map_err(|_| ParseError::Malformed { parser: "nginx" })?;

        Ok(Event {
            remote_addr: captures[1].to_string(),
            method: captures[3].to_string(),
            path: captures[4].to_string(),
            status,
            timestamp: Some(timestamp),
            raw: line.to_string(),
        })
    }
}
