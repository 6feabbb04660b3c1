use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::errors::{ProvisionError, ProvisionResult};

/// Resolved slave addresses in ordinal order. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    addresses: Vec<Ipv4Addr>,
}

impl Inventory {
    pub fn new(addresses: Vec<Ipv4Addr>) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Host-list artifact: one address per line, newline terminated, no header.
    pub fn render(&self) -> String {
        self.addresses.iter().map(|addr| format!("{}\n", addr)).collect()
    }

    /// Reads a host-list artifact back. Blank lines are ignored.
    pub fn parse(text: &str) -> ProvisionResult<Self> {
        let mut addresses = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let addr = line.parse::<Ipv4Addr>().map_err(|_| {
                ProvisionError::InvalidRequest(format!(
                    "host list line {}: {:?} is not an IPv4 address",
                    idx + 1,
                    line
                ))
            })?;
            addresses.push(addr);
        }
        Ok(Self { addresses })
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
