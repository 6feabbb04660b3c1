use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Backend-assigned identifier of an instantiated VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveState {
    Requested,
    Described,
    Resolved,
    Unresolved,
}

/// One slave of a provisioning run.
///
/// `instance_id` and `address` are write-once: the transition methods
/// refuse to replace a value that is already set.
#[derive(Debug, Clone)]
pub struct SlaveInstance {
    ordinal: u32,
    name: String,
    instance_id: Option<InstanceId>,
    address: Option<Ipv4Addr>,
    state: SlaveState,
}

impl SlaveInstance {
    pub fn new(ordinal: u32, cluster_name: &str) -> Self {
        Self {
            ordinal,
            name: slave_name(ordinal, cluster_name),
            instance_id: None,
            address: None,
            state: SlaveState::Requested,
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance_id.as_ref()
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Records the id returned by `instantiate`. Returns false if one was already assigned.
    pub fn assign_id(&mut self, id: InstanceId) -> bool {
        if self.instance_id.is_some() {
            return false;
        }
        self.instance_id = Some(id);
        true
    }

    pub fn mark_described(&mut self) {
        if self.state == SlaveState::Requested {
            self.state = SlaveState::Described;
        }
    }

    /// Records the resolved address. Returns false if one was already set.
    pub fn resolve(&mut self, address: Ipv4Addr) -> bool {
        if self.address.is_some() {
            return false;
        }
        self.address = Some(address);
        self.state = SlaveState::Resolved;
        true
    }

    pub fn mark_unresolved(&mut self) {
        if self.state != SlaveState::Resolved {
            self.state = SlaveState::Unresolved;
        }
    }
}

/// Deterministic VM name for a slave: `slave{ordinal}.{cluster_name}`.
pub fn slave_name(ordinal: u32, cluster_name: &str) -> String {
    format!("slave{}.{}", ordinal, cluster_name)
}
