//! Address validation and whitelist matching.

use super::BackendError;
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;

/// Strictly parse an address, rejecting empty and malformed input.
pub fn validate_ip(ip: &str) -> Result<IpAddr, BackendError> {
    if ip.is_empty() {
        return Err(BackendError::EmptyIp);
    }
    ip.parse()
        .map_err(|_| BackendError::InvalidIp(ip.to_string()))
}

/// True for real IPv6 addresses; IPv4-mapped addresses count as IPv4 so
/// they get /32 subnets and the v4 tooling.
pub fn is_ipv6(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => false,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_none(),
    }
}

/// Membership test over explicit addresses and CIDR ranges.
///
/// Built once from the configuration whitelist; invalid entries are
/// silently discarded.
#[derive(Debug, Default)]
pub struct WhitelistMatcher {
    ips: HashSet<IpAddr>,
    nets: Vec<IpNet>,
}

impl WhitelistMatcher {
    pub fn new(entries: &[String]) -> Self {
        let mut ips = HashSet::new();
        let mut nets = Vec::new();
        for entry in entries {
            if let Ok(ip) = entry.parse::<IpAddr>() {
                ips.insert(ip);
            } else if let Ok(net) = entry.parse::<IpNet>() {
                nets.push(net);
            }
        }
        Self { ips, nets }
    }

    /// True iff the address appears as a literal or falls within one of
    /// the configured ranges. Unparsable input never matches.
    pub fn contains(&self, ip: &str) -> bool {
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return false;
        };
        self.ips.contains(&addr) || self.nets.iter().any(|net| net.contains(&addr))
    }
}
