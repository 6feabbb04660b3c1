use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;

use crate::errors::{ProvisionError, ProvisionResult};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterRequest {
    pub cluster_name: String,
    pub slave_count: u32,
    pub master_address: String,
    pub verbose: bool,
}

/// Result of the pre-flight check, decided without touching a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Approved,
    /// Each entry is a question the operator has to answer yes to.
    NeedsConfirmation(Vec<String>),
    Rejected(String),
}

/// The operator's answer to `PolicyDecision::NeedsConfirmation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Confirmed,
    NotConfirmed,
}

#[derive(Debug, Clone)]
pub struct PreflightPolicy {
    pub confirm_threshold: u32,
    pub max_slaves: u32,
    pub confirm_cluster_name: bool,
}

impl Default for PreflightPolicy {
    fn default() -> Self {
        Self {
            confirm_threshold: 10,
            max_slaves: 64,
            confirm_cluster_name: true,
        }
    }
}

impl PreflightPolicy {
    pub fn check(&self, request: &ClusterRequest) -> PolicyDecision {
        if request.slave_count > self.max_slaves {
            return PolicyDecision::Rejected(format!(
                "{} slaves requested, the limit is {}",
                request.slave_count, self.max_slaves
            ));
        }
        if request.slave_count == 0 {
            return PolicyDecision::Approved;
        }

        let mut questions = Vec::new();
        if request.slave_count > self.confirm_threshold {
            questions.push(format!(
                "Are you sure you want to create {} slaves?",
                request.slave_count
            ));
        }
        if self.confirm_cluster_name {
            questions.push(format!(
                "Cluster name will be set to {:?}. Slave hostnames derive from it, is it unique?",
                request.cluster_name
            ));
        }

        if questions.is_empty() {
            PolicyDecision::Approved
        } else {
            PolicyDecision::NeedsConfirmation(questions)
        }
    }

    /// Combines the decision with the operator's answer.
    pub fn authorize(&self, request: &ClusterRequest, approval: Approval) -> ProvisionResult<()> {
        match self.check(request) {
            PolicyDecision::Approved => Ok(()),
            PolicyDecision::NeedsConfirmation(_) if approval == Approval::Confirmed => Ok(()),
            PolicyDecision::NeedsConfirmation(questions) => Err(ProvisionError::Rejected(format!(
                "operator confirmation required: {}",
                questions.join(" ")
            ))),
            PolicyDecision::Rejected(reason) => Err(ProvisionError::Rejected(reason)),
        }
    }
}

/// Checks the request shape and returns the parsed master address.
pub fn validate_request(request: &ClusterRequest) -> ProvisionResult<IpAddr> {
    let name = request.cluster_name.trim();
    if name.is_empty() {
        return Err(ProvisionError::InvalidRequest("cluster name is empty".into()));
    }
    if name.len() != request.cluster_name.len()
        || name.chars().any(|c| c.is_whitespace() || c == '/')
    {
        return Err(ProvisionError::InvalidRequest(format!(
            "cluster name {:?} must not contain whitespace or '/'",
            request.cluster_name
        )));
    }

    validate_master_address(&request.master_address)
}

/// The master must be reachable from outside the cluster's private network.
pub fn validate_master_address(address: &str) -> ProvisionResult<IpAddr> {
    let ip: IpAddr = address.trim().parse().map_err(|_| {
        ProvisionError::InvalidRequest(format!("master address {:?} is not an IP address", address))
    })?;

    let reserved = match ip {
        IpAddr::V4(v4) => is_reserved_v4(v4),
        IpAddr::V6(v6) => is_reserved_v6(v6),
    };
    if reserved {
        return Err(ProvisionError::InvalidRequest(format!(
            "master address {} is in reserved or private address space, a public address is required",
            ip
        )));
    }
    Ok(ip)
}

fn is_reserved_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || a == 0
        // shared address space (CGNAT) 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
        // benchmarking 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4
        || a >= 240
}

fn is_reserved_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_reserved_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (first & 0xffc0) == 0xfe80
        // documentation 2001:db8::/32
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}
