//! Apache common/combined log format parser.

use super::{Event, ParseError, Parser};
use chrono::{DateTime, Utc};
use regex::Regex;

// Accepts both the common and combined variants:
// 127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326
// 127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326 "http://example.com/" "Mozilla/4.08"
const APACHE_PATTERN: &str =
    r#"^(\S+) \S+ \S+ \[([^\]]+)\] "([A-Z]+) ([^"]*) HTTP/[0-9.]+" (\d{3}) \S+.*$"#;

const TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Parses the Apache common (and combined) access log format.
pub struct ApacheCommonParser {
    re: Regex,
}

impl ApacheCommonParser {
    pub fn new() -> Self {
        Self {
            re: Regex::new(APACHE_PATTERN).expect("apache log pattern is valid"),
        }
    }
}

impl Default for ApacheCommonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for ApacheCommonParser {
    fn parse(&self, line: &str) -> Result<Event, ParseError> {
        let captures = self
            .re
            .captures(line)
            .ok_or(ParseError::Malformed { parser: "apache" })?;

        let timestamp = DateTime::parse_from_str(&captures[2], TIME_FORMAT)
            .map_err(|source| ParseError::InvalidTime {
                parser: "apache",
                source,
            })?
            .with_timezone(&Utc);

        let status: u16 = captures[5]
            .parse()
            .map_err(|_| ParseError::Malformed { parser: "apache" })?;

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
