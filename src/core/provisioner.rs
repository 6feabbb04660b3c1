use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::backend::VmBackend;
use crate::core::resolver::AddressResolver;
use crate::core::vm::{InstanceId, SlaveInstance};
use crate::errors::handlers::RetryPolicy;
use crate::errors::{FailureStage, ProvisionError};
use crate::publisher::Inventory;

/// A slave that made it all the way to `Resolved`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSlave {
    pub ordinal: u32,
    pub name: String,
    pub instance_id: InstanceId,
    pub address: Ipv4Addr,
}

/// Why a slave did not resolve, with what an operator needs to clean up after it.
#[derive(Debug, Clone, Serialize)]
pub struct SlaveFailure {
    pub ordinal: u32,
    pub name: String,
    pub stage: FailureStage,
    pub instance_id: Option<InstanceId>,
    /// A VM may exist on the backend even though it is not in the inventory.
    pub orphan_risk: bool,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ProvisionOutcome {
    pub resolved: BTreeMap<u32, ResolvedSlave>,
    pub failures: Vec<SlaveFailure>,
}

impl ProvisionOutcome {
    pub fn inventory(&self) -> Inventory {
        Inventory::new(self.resolved.values().map(|slave| slave.address).collect())
    }

    pub fn failed_ordinals(&self) -> Vec<u32> {
        self.failures.iter().map(|f| f.ordinal).collect()
    }
}

// The description may not carry an address yet; describe failures are final.
fn is_missing_address(error: &ProvisionError) -> bool {
    matches!(error, ProvisionError::AddressNotFound { .. })
}

/// Drives instantiate → describe → resolve for every requested slave.
pub struct SlaveProvisioner<B> {
    backend: B,
    resolver: AddressResolver,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<B: VmBackend> SlaveProvisioner<B> {
    pub fn new(backend: B, resolver: AddressResolver) -> Self {
        Self {
            backend,
            resolver,
            retry: RetryPolicy::single(),
            concurrency: 1,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of slaves in flight at once. `1` keeps strict ordinal order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Attempts every ordinal in `1..=count`; one slave failing never stops the others.
    pub async fn provision(&self, cluster_name: &str, template_name: &str, count: u32) -> ProvisionOutcome {
        info!(cluster_name, template_name, count, concurrency = self.concurrency, "Creating slave nodes");

        let results: Vec<Result<ResolvedSlave, SlaveFailure>> = stream::iter(1..=count)
            .map(|ordinal| self.provision_one(cluster_name, template_name, ordinal))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut outcome = ProvisionOutcome::default();
        for result in results {
            match result {
                Ok(slave) => {
                    outcome.resolved.insert(slave.ordinal, slave);
                }
                Err(failure) => outcome.failures.push(failure),
            }
        }
        outcome.failures.sort_by_key(|f| f.ordinal);

        info!(
            cluster_name,
            resolved = outcome.resolved.len(),
            failed = outcome.failures.len(),
            "Slave provisioning finished"
        );
        outcome
    }

    async fn provision_one(
        &self,
        cluster_name: &str,
        template_name: &str,
        ordinal: u32,
    ) -> Result<ResolvedSlave, SlaveFailure> {
        let mut slave = SlaveInstance::new(ordinal, cluster_name);

        let instantiated = self.backend.instantiate(template_name, slave.name()).await;
        let instance_id = match instantiated {
            Ok(id) => id,
            Err(e) => return Err(self.fail(&mut slave, FailureStage::Instantiate, e)),
        };
        slave.assign_id(instance_id.clone());

        let (backend, resolver, id) = (&self.backend, &self.resolver, &instance_id);
        let lookup = self
            .retry
            .run("describe", is_missing_address, move || async move {
                let description = backend.describe(id).await?;
                resolver
                    .resolve(&description)
                    .ok_or_else(|| ProvisionError::AddressNotFound {
                        instance_id: id.to_string(),
                    })
            })
            .await;

        let address = match lookup {
            Ok(address) => address,
            Err(e @ ProvisionError::AddressNotFound { .. }) => {
                slave.mark_described();
                return Err(self.fail(&mut slave, FailureStage::Resolve, e));
            }
            Err(e) => return Err(self.fail(&mut slave, FailureStage::Describe, e)),
        };
        slave.mark_described();
        slave.resolve(address);

        info!(ordinal, name = slave.name(), instance_id = %instance_id, %address, "Slave resolved");
        Ok(ResolvedSlave {
            ordinal,
            name: slave.name().to_string(),
            instance_id,
            address,
        })
    }

    fn fail(&self, slave: &mut SlaveInstance, stage: FailureStage, error: ProvisionError) -> SlaveFailure {
        slave.mark_unresolved();
        let orphan_risk = slave.instance_id().is_some() || error.may_orphan_vm();
        warn!(
            ordinal = slave.ordinal(),
            name = slave.name(),
            %stage,
            instance_id = ?slave.instance_id(),
            orphan_risk,
            error = %error,
            "Slave failed"
        );
        SlaveFailure {
            ordinal: slave.ordinal(),
            name: slave.name().to_string(),
            stage,
            instance_id: slave.instance_id().cloned(),
            orphan_risk,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::ResolveStrategy;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Describes instance `n` as `10.0.0.n`, except for scripted failures.
    #[derive(Default)]
    struct ScriptedBackend {
        fail_instantiate: Vec<String>,
        garbled_instantiate: Vec<String>,
        fail_describe: Vec<String>,
        blank_describe: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VmBackend for ScriptedBackend {
        async fn instantiate(&self, _template: &str, name: &str) -> Result<InstanceId, ProvisionError> {
            let ordinal = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(format!("instantiate {}", name));
                name.trim_start_matches("slave").split('.').next().unwrap().to_string()
            };
            if self.fail_instantiate.contains(&ordinal) {
                return Err(ProvisionError::BackendUnavailable {
                    message: "template locked".into(),
                });
            }
            if self.garbled_instantiate.contains(&ordinal) {
                return Err(ProvisionError::InstantiationFailed {
                    instance_name: name.to_string(),
                    output: "[one.template.instantiate] timeout".into(),
                });
            }
            Ok(InstanceId::new(format!("{}", 100 + ordinal.parse::<u32>().unwrap())))
        }

        async fn describe(&self, id: &InstanceId) -> Result<String, ProvisionError> {
            self.calls.lock().unwrap().push(format!("describe {}", id));
            let ordinal = (id.as_str().parse::<u32>().unwrap() - 100).to_string();
            if self.fail_describe.contains(&ordinal) {
                return Err(ProvisionError::DescribeFailed {
                    instance_id: id.to_string(),
                    message: "no such VM".into(),
                });
            }
            if self.blank_describe.contains(&ordinal) {
                return Ok("STATE: PENDING".into());
            }
            Ok(format!("VM {}\nNIC=[ IP=\"10.0.0.{}\" ]", id, ordinal))
        }
    }

    impl ScriptedBackend {
        fn count(&self, prefix: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    fn provisioner(backend: ScriptedBackend) -> SlaveProvisioner<ScriptedBackend> {
        SlaveProvisioner::new(backend, AddressResolver::new(ResolveStrategy::FirstMatch).unwrap())
    }

    #[tokio::test]
    async fn test_zero_slaves_makes_no_calls() {
        let p = provisioner(ScriptedBackend::default());
        let outcome = p.provision("alpha", "spark-slave", 0).await;

        assert!(outcome.resolved.is_empty());
        assert!(outcome.failures.is_empty());
        assert!(p.backend().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_slaves_resolved_in_order() {
        let p = provisioner(ScriptedBackend::default());
        let outcome = p.provision("alpha", "spark-slave", 3).await;

        assert_eq!(outcome.resolved.len(), 3);
        assert_eq!(outcome.resolved[&2].name, "slave2.alpha");
        assert_eq!(outcome.resolved[&2].instance_id, InstanceId::new("102"));
        assert_eq!(
            outcome.inventory().addresses(),
            &[
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
            ]
        );
        assert_eq!(
            *p.backend().calls.lock().unwrap(),
            vec![
                "instantiate slave1.alpha",
                "describe 101",
                "instantiate slave2.alpha",
                "describe 102",
                "instantiate slave3.alpha",
                "describe 103",
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_are_recorded_per_stage() {
        let p = provisioner(ScriptedBackend {
            fail_instantiate: vec!["1".into()],
            fail_describe: vec!["2".into()],
            blank_describe: vec!["3".into()],
            ..Default::default()
        });
        let outcome = p.provision("alpha", "spark-slave", 4).await;

        assert_eq!(outcome.resolved.keys().copied().collect::<Vec<_>>(), vec![4]);
        assert_eq!(outcome.failed_ordinals(), vec![1, 2, 3]);

        let stages: Vec<_> = outcome.failures.iter().map(|f| f.stage).collect();
        assert_eq!(
            stages,
            vec![FailureStage::Instantiate, FailureStage::Describe, FailureStage::Resolve]
        );

        assert!(outcome.failures[0].instance_id.is_none());
        assert!(!outcome.failures[0].orphan_risk);
        assert_eq!(outcome.failures[1].instance_id, Some(InstanceId::new("102")));
        assert!(outcome.failures[1].orphan_risk);

        assert_eq!(p.backend().count("instantiate"), 4);
        assert_eq!(p.backend().count("describe"), 3);
    }

    #[tokio::test]
    async fn test_retry_repeats_describe_for_missing_address() {
        let p = provisioner(ScriptedBackend {
            blank_describe: vec!["1".into()],
            ..Default::default()
        })
        .with_retry(RetryPolicy::new(3, Duration::ZERO));

        let outcome = p.provision("alpha", "spark-slave", 1).await;
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Resolve);
        assert_eq!(p.backend().count("instantiate"), 1);
        assert_eq!(p.backend().count("describe"), 3);
    }

    #[tokio::test]
    async fn test_unparsable_instantiate_output_flags_possible_orphan() {
        let p = provisioner(ScriptedBackend {
            fail_instantiate: vec!["1".into()],
            garbled_instantiate: vec!["2".into()],
            ..Default::default()
        });
        let outcome = p.provision("alpha", "spark-slave", 3).await;

        assert_eq!(outcome.failed_ordinals(), vec![1, 2]);

        let rejected = &outcome.failures[0];
        assert_eq!(rejected.stage, FailureStage::Instantiate);
        assert!(rejected.instance_id.is_none());
        assert!(!rejected.orphan_risk);

        let garbled = &outcome.failures[1];
        assert_eq!(garbled.name, "slave2.alpha");
        assert_eq!(garbled.stage, FailureStage::Instantiate);
        assert!(garbled.instance_id.is_none());
        assert!(garbled.orphan_risk);
        assert!(garbled.message.contains("returned no usable id"));

        // no id, nothing to describe
        assert_eq!(p.backend().count("describe"), 1);
    }

    #[tokio::test]
    async fn test_describe_failure_is_not_retried() {
        let p = provisioner(ScriptedBackend {
            fail_describe: vec!["1".into()],
            ..Default::default()
        })
        .with_retry(RetryPolicy::new(3, Duration::ZERO));

        let outcome = p.provision("alpha", "spark-slave", 1).await;
        assert_eq!(outcome.failures[0].stage, FailureStage::Describe);
        assert_eq!(p.backend().count("describe"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_provisioning_keeps_ordinal_order() {
        let p = provisioner(ScriptedBackend {
            fail_describe: vec!["5".into()],
            ..Default::default()
        })
        .with_concurrency(4);

        let outcome = p.provision("beta", "spark-slave", 8).await;
        assert_eq!(outcome.resolved.len(), 7);
        assert_eq!(outcome.failed_ordinals(), vec![5]);

        let expected: Vec<Ipv4Addr> = [1, 2, 3, 4, 6, 7, 8]
            .iter()
            .map(|n| Ipv4Addr::new(10, 0, 0, *n))
            .collect();
        assert_eq!(outcome.inventory().addresses(), expected.as_slice());
        assert_eq!(p.backend().count("instantiate"), 8);
    }
}
