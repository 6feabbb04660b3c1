pub mod backend;
pub mod provisioner;
pub mod resolver;
pub mod vm;

pub use backend::{OpenNebulaCli, VmBackend};
pub use provisioner::{ProvisionOutcome, ResolvedSlave, SlaveFailure, SlaveProvisioner};
pub use resolver::{AddressResolver, ResolveStrategy};
pub use vm::{InstanceId, SlaveInstance, SlaveState};
