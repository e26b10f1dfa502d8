//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use foxhole_fw::config::Config;
use foxhole_fw::firewall::{Backend, BackendError};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// A backend that records calls instead of touching any firewall.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Ban { ip: String, rule_id: String },
    Unban { ip: String },
}

impl RecordingBackend {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ban_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Ban { .. }))
            .count()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn ban(
        &self,
        ip: &str,
        _duration: Duration,
        _reason: &str,
        rule_id: &str,
    ) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(BackendCall::Ban {
            ip: ip.to_string(),
            rule_id: rule_id.to_string(),
        });
        Ok(())
    }

    async fn unban(&self, ip: &str) -> Result<(), BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::Unban { ip: ip.to_string() });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Create a scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("foxhole-test-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Build a config with a single rule over the given log path.
pub fn single_rule_config(
    log_path: &str,
    max_errors: u32,
    window: &str,
    whitelist: &[&str],
) -> Config {
    let whitelist = if whitelist.is_empty() {
        String::new()
    } else {
        let entries = whitelist
            .iter()
            .map(|s| format!("    - \"{s}\""))
            .collect::<Vec<_>>()
            .join("\n");
        format!("  whitelist:\n{entries}\n")
    };
    serde_yaml::from_str(&format!(
        r#"
log:
  path: {log_path}
  parser: nginx_combined
rules:
  - id: login
    method: POST
    path: /login
    max_errors: {max_errors}
    window: {window}
    ban_duration: 5m
backend:
  type: iptables
{whitelist}  iptables:
    table: filter
    chain: INPUT
"#
    ))
    .unwrap()
}

/// Fixed base time used by the log line helpers.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 10, 13, 55, 36).unwrap()
}

/// Produce an nginx combined log line at `base_time() + offset_secs`.
pub fn nginx_line(ip: &str, method: &str, path: &str, status: u16, offset_secs: i64) -> String {
    let ts = (base_time() + chrono::TimeDelta::seconds(offset_secs))
        .format("%d/%b/%Y:%H:%M:%S %z")
        .to_string();
    format!(r#"{ip} - - [{ts}] "{method} {path} HTTP/1.1" {status} 217 "-" "test-agent""#)
}
