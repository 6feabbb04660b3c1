pub mod policy;

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::core::{
    AddressResolver, OpenNebulaCli, ResolvedSlave, SlaveFailure, SlaveProvisioner, VmBackend,
};
use crate::errors::handlers::RetryPolicy;
use crate::errors::ProvisionResult;
use crate::publisher::{Inventory, InventoryPublisher, PublishReceipt, RemoteTransport, ScpTransport};

pub use policy::{
    validate_master_address, validate_request, Approval, ClusterRequest, PolicyDecision,
    PreflightPolicy,
};

/// Everything the deployer needs that is not part of a single request.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub slave_template: String,
    pub remote_dir: String,
    pub policy: PreflightPolicy,
}

impl DeployConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            slave_template: settings.backend.slave_template.clone(),
            remote_dir: settings.publish.remote_dir.clone(),
            policy: PreflightPolicy {
                confirm_threshold: settings.provisioning.confirm_threshold,
                max_slaves: settings.provisioning.max_slaves,
                confirm_cluster_name: settings.provisioning.confirm_cluster_name,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    Delivered(PublishReceipt),
    Failed { message: String },
    Skipped { reason: String },
}

/// Terminal outcome of one deployment run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub run_id: Uuid,
    pub cluster_name: String,
    pub requested: u32,
    pub provisioned: Vec<ResolvedSlave>,
    pub failures: Vec<SlaveFailure>,
    /// Kept even when publishing failed so it can be delivered again.
    pub inventory: Inventory,
    pub publish: PublishOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !matches!(self.publish, PublishOutcome::Failed { .. })
    }
}

/// Validates a request, provisions the slaves and publishes their addresses.
///
/// VMs are never torn down here, not even after a partial failure.
pub struct ClusterDeployer<B, T> {
    config: DeployConfig,
    provisioner: SlaveProvisioner<B>,
    publisher: InventoryPublisher<T>,
}

impl ClusterDeployer<OpenNebulaCli, ScpTransport> {
    pub fn from_settings(settings: &Settings) -> ProvisionResult<Self> {
        let backend = OpenNebulaCli::new(
            settings.backend.template_command.clone(),
            settings.backend.vm_command.clone(),
        );
        let resolver = AddressResolver::new(settings.backend.resolve_strategy)?;
        let provisioner = SlaveProvisioner::new(backend, resolver)
            .with_concurrency(settings.provisioning.concurrency)
            .with_retry(RetryPolicy::new(
                settings.provisioning.describe_attempts,
                settings.provisioning.describe_retry_delay(),
            ));

        let transport = ScpTransport::new(
            settings.publish.scp_command.clone(),
            settings.publish.identity_file.clone(),
        );
        let publisher = InventoryPublisher::new(
            transport,
            settings.publish.hosts_file.clone(),
            settings.publish.remote_user.clone(),
        );

        Ok(Self::new(DeployConfig::from_settings(settings), provisioner, publisher))
    }
}

impl<B: VmBackend, T: RemoteTransport> ClusterDeployer<B, T> {
    pub fn new(config: DeployConfig, provisioner: SlaveProvisioner<B>, publisher: InventoryPublisher<T>) -> Self {
        Self {
            config,
            provisioner,
            publisher,
        }
    }

    pub fn provisioner(&self) -> &SlaveProvisioner<B> {
        &self.provisioner
    }

    pub fn publisher(&self) -> &InventoryPublisher<T> {
        &self.publisher
    }

    /// Validates `request` and reports what the operator still has to confirm.
    pub fn preflight(&self, request: &ClusterRequest) -> ProvisionResult<PolicyDecision> {
        validate_request(request)?;
        Ok(self.config.policy.check(request))
    }

    pub async fn deploy(&self, request: &ClusterRequest, approval: Approval) -> ProvisionResult<DeploymentReport> {
        let master = validate_request(request)?;
        self.config.policy.authorize(request, approval)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            cluster = %request.cluster_name,
            slaves = request.slave_count,
            %master,
            "Starting cluster deployment"
        );

        let outcome = self
            .provisioner
            .provision(&request.cluster_name, &self.config.slave_template, request.slave_count)
            .await;
        let inventory = outcome.inventory();

        let publish = if inventory.is_empty() {
            PublishOutcome::Skipped {
                reason: "no slave resolved to an address".to_string(),
            }
        } else {
            match self.publish(&inventory, master).await {
                Ok(receipt) => PublishOutcome::Delivered(receipt),
                Err(e) => PublishOutcome::Failed { message: e.to_string() },
            }
        };

        if !outcome.failures.is_empty() {
            warn!(
                %run_id,
                failed = ?outcome.failed_ordinals(),
                "Some slaves were not provisioned; created VMs are left running"
            );
        }

        Ok(DeploymentReport {
            run_id,
            cluster_name: request.cluster_name.clone(),
            requested: request.slave_count,
            provisioned: outcome.resolved.into_values().collect(),
            failures: outcome.failures,
            inventory,
            publish,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Delivers an already built inventory again, e.g. after a failed transfer.
    pub async fn republish(&self, inventory: &Inventory, master_address: &str) -> ProvisionResult<PublishReceipt> {
        let master = validate_master_address(master_address)?;
        self.publish(inventory, master).await
    }

    async fn publish(&self, inventory: &Inventory, master: IpAddr) -> ProvisionResult<PublishReceipt> {
        self.publisher.publish(inventory, master, &self.config.remote_dir).await
    }
}
