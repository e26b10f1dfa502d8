//! iptables backend.
//!
//! Drives the local `iptables` binary (or `ip6tables` for IPv6 addresses)
//! as a child process. The child is killed if the root token fires while
//! it is still running.

use super::{is_ipv6, validate_ip, Backend, BackendError};
use crate::config::IptablesConfig;
use async_trait::async_trait;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Applies bans through the local iptables binary.
pub struct IptablesBackend {
    table: String,
    chain: String,
    token: CancellationToken,
}

impl IptablesBackend {
    pub fn new(config: &IptablesConfig, token: CancellationToken) -> Self {
        Self {
            table: config.table.clone(),
            chain: config.chain.clone(),
            token,
        }
    }

    fn ban_args(&self, ip: &str) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.table.clone(),
            "-I".to_string(),
            self.chain.clone(),
            "1".to_string(),
            "-s".to_string(),
            ip.to_string(),
            "-j".to_string(),
            "DROP".to_string(),
        ]
    }

    fn unban_args(&self, ip: &str) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.table.clone(),
            "-D".to_string(),
            self.chain.clone(),
            "-s".to_string(),
            ip.to_string(),
            "-j".to_string(),
            "DROP".to_string(),
        ]
    }

    async fn run_command(&self, program: &str, args: &[String]) -> Result<(), BackendError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| BackendError::CommandIo {
            command: program.to_string(),
            source,
        })?;

        // Dropping the in-flight future on cancellation kills the child
        // via kill_on_drop.
        let output = tokio::select! {
            _ = self.token.cancelled() => return Err(BackendError::Cancelled),
            output = child.wait_with_output() => {
                output.map_err(|source| BackendError::CommandIo {
                    command: program.to_string(),
                    source,
                })?
            }
        };

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(BackendError::CommandFailed {
                command: program.to_string(),
                status: output.status,
                output: combined.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Which binary handles this address family.
fn program_for(ip: &IpAddr) -> &'static str {
    if is_ipv6(ip) {
        "ip6tables"
    } else {
        "iptables"
    }
}

#[async_trait]
impl Backend for IptablesBackend {
    async fn ban(
        &self,
        ip: &str,
        duration: Duration,
        reason: &str,
        rule_id: &str,
    ) -> Result<(), BackendError> {
        let addr = validate_ip(ip)?;
        let program = program_for(&addr);
        info!(
            ip,
            table = %self.table,
            chain = %self.chain,
            rule = rule_id,
            reason,
            duration = %humantime::format_duration(duration),
            "{program} ban"
        );
        self.run_command(program, &self.ban_args(ip)).await
    }

    async fn unban(&self, ip: &str) -> Result<(), BackendError> {
        let addr = validate_ip(ip)?;
        let program = program_for(&addr);
        info!(ip, table = %self.table, chain = %self.chain, "{program} unban");
        self.run_command(program, &self.unban_args(ip)).await
    }

    fn name(&self) -> &'static str {
        "iptables"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> IptablesBackend {
        IptablesBackend::new(
            &IptablesConfig {
                table: "filter".to_string(),
                chain: "INPUT".to_string(),
            },
            CancellationToken::new(),
        )
    }

    #[test]
    fn builds_ban_arguments() {
        let args = backend().ban_args("1.2.3.4");
        assert_eq!(
            args,
            ["-t", "filter", "-I", "INPUT", "1", "-s", "1.2.3.4", "-j", "DROP"]
        );
    }

    #[test]
    fn builds_unban_arguments() {
        let args = backend().unban_args("1.2.3.4");
        assert_eq!(
            args,
            ["-t", "filter", "-D", "INPUT", "-s", "1.2.3.4", "-j", "DROP"]
        );
    }

    #[test]
    fn selects_binary_by_address_family() {
        assert_eq!(program_for(&"1.2.3.4".parse().unwrap()), "iptables");
        assert_eq!(program_for(&"2001:db8::1".parse().unwrap()), "ip6tables");
    }

    #[tokio::test]
    async fn rejects_invalid_address_before_exec() {
        let backend = backend();
        assert!(matches!(
            backend.ban("", Duration::from_secs(60), "r", "id").await,
            Err(BackendError::EmptyIp)
        ));
        assert!(matches!(
            backend.unban("bogus").await,
            Err(BackendError::InvalidIp(_))
        ));
    }
}
