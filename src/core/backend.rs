use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::core::vm::InstanceId;
use crate::errors::{ProvisionError, ProvisionResult};

/// Virtualization platform the slaves are created on.
///
/// Both calls are one-shot. Retrying is the provisioner's business.
#[async_trait]
pub trait VmBackend: Send + Sync {
    /// Instantiates `template_name` as a VM called `instance_name`.
    async fn instantiate(&self, template_name: &str, instance_name: &str) -> ProvisionResult<InstanceId>;

    /// Returns the backend's free-form description of an instance.
    async fn describe(&self, instance_id: &InstanceId) -> ProvisionResult<String>;
}

/// Drives the OpenNebula command line tools (`onetemplate`, `onevm`).
#[derive(Debug, Clone)]
pub struct OpenNebulaCli {
    template_command: String,
    vm_command: String,
}

impl OpenNebulaCli {
    pub fn new(template_command: impl Into<String>, vm_command: impl Into<String>) -> Self {
        Self {
            template_command: template_command.into(),
            vm_command: vm_command.into(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<std::process::Output> {
        debug!(program, ?args, "Executing backend command");
        Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ProvisionError::BackendUnavailable {
                message: format!("failed to run {}: {}", program, e),
            })
    }
}

impl Default for OpenNebulaCli {
    fn default() -> Self {
        Self::new("onetemplate", "onevm")
    }
}

#[async_trait]
impl VmBackend for OpenNebulaCli {
    async fn instantiate(&self, template_name: &str, instance_name: &str) -> ProvisionResult<InstanceId> {
        let output = self
            .run(
                &self.template_command,
                &["instantiate", template_name, "--name", instance_name],
            )
            .await?;

        if !output.status.success() {
            return Err(ProvisionError::BackendUnavailable {
                message: format!(
                    "{} instantiate rejected {}: {}",
                    self.template_command,
                    instance_name,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_instance_id(&stdout).ok_or_else(|| ProvisionError::InstantiationFailed {
            instance_name: instance_name.to_string(),
            output: stdout.to_string(),
        })?;

        info!(instance_name, instance_id = %id, "Instantiated VM");
        Ok(id)
    }

    async fn describe(&self, instance_id: &InstanceId) -> ProvisionResult<String> {
        let output = self.run(&self.vm_command, &["show", instance_id.as_str()]).await?;

        if !output.status.success() {
            return Err(ProvisionError::DescribeFailed {
                instance_id: instance_id.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let description = String::from_utf8_lossy(&output.stdout).to_string();
        if description.trim().is_empty() {
            return Err(ProvisionError::DescribeFailed {
                instance_id: instance_id.to_string(),
                message: "empty description".to_string(),
            });
        }

        Ok(description)
    }
}

/// Extracts the id from `instantiate` output such as `VM ID: 42`.
///
/// The prefix is optional; whatever remains must be a single token.
pub fn parse_instance_id(output: &str) -> Option<InstanceId> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let candidate = match line.rsplit_once(':') {
        Some((_, id)) => id.trim(),
        None => line,
    };

    if candidate.is_empty() || candidate.split_whitespace().count() != 1 {
        return None;
    }
    Some(InstanceId::new(candidate))
}
