use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod handlers;

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The backend process could not be started or rejected the call.
    #[error("Backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
    },

    /// The backend accepted `instantiate` but its output carried no usable id.
    /// A VM may exist anyway, so the raw output is kept for the operator.
    #[error("Instantiation of {instance_name} returned no usable id: {output:?}")]
    InstantiationFailed {
        instance_name: String,
        output: String,
    },

    #[error("Failed to describe instance {instance_id}: {message}")]
    DescribeFailed {
        instance_id: String,
        message: String,
    },

    #[error("No IPv4 address found in description of instance {instance_id}")]
    AddressNotFound {
        instance_id: String,
    },

    #[error("Transfer to {destination} failed: {message}")]
    TransferFailed {
        destination: String,
        message: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Address pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl ProvisionError {
    /// True when the failed step may have left a VM behind.
    pub fn may_orphan_vm(&self) -> bool {
        matches!(
            self,
            ProvisionError::InstantiationFailed { .. }
                | ProvisionError::DescribeFailed { .. }
                | ProvisionError::AddressNotFound { .. }
        )
    }
}

/// Step of the per-slave pipeline at which a slave stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Instantiate,
    Describe,
    Resolve,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Instantiate => write!(f, "instantiate"),
            FailureStage::Describe => write!(f, "describe"),
            FailureStage::Resolve => write!(f, "resolve"),
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
