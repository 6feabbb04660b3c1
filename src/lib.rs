pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod publisher;

// Re-exports
pub use cluster::{Approval, ClusterDeployer, ClusterRequest, DeployConfig, DeploymentReport, PublishOutcome};
pub use core::{AddressResolver, OpenNebulaCli, SlaveProvisioner, VmBackend};
pub use errors::{FailureStage, ProvisionError, ProvisionResult};
pub use publisher::{Inventory, InventoryPublisher, RemoteTransport, ScpTransport};
