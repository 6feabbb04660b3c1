pub mod inventory;
pub mod transport;

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::errors::ProvisionResult;

pub use inventory::Inventory;
pub use transport::{RemoteTarget, RemoteTransport, ScpTransport};

#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub local_path: PathBuf,
    pub destination: String,
    pub addresses: usize,
}

/// Writes the host list locally and ships it to the master.
pub struct InventoryPublisher<T> {
    transport: T,
    local_path: PathBuf,
    remote_user: String,
}

impl<T: RemoteTransport> InventoryPublisher<T> {
    pub fn new(transport: T, local_path: impl Into<PathBuf>, remote_user: impl Into<String>) -> Self {
        Self {
            transport,
            local_path: local_path.into(),
            remote_user: remote_user.into(),
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Renders `inventory`, writes it to the local artifact and copies it to
    /// `master:destination`. Safe to call again with the same inventory after
    /// a transfer failure.
    pub async fn publish(
        &self,
        inventory: &Inventory,
        master: IpAddr,
        destination: &str,
    ) -> ProvisionResult<PublishReceipt> {
        self.write_artifact(inventory).await?;

        let target = RemoteTarget {
            user: self.remote_user.clone(),
            host: master,
            path: destination.to_string(),
        };
        info!(destination = %target, addresses = inventory.len(), "Copying host list to master");

        if let Err(e) = self.transport.copy(&self.local_path, &target).await {
            error!(destination = %target, error = %e, "Host list transfer failed");
            return Err(e);
        }

        Ok(PublishReceipt {
            local_path: self.local_path.clone(),
            destination: target.to_string(),
            addresses: inventory.len(),
        })
    }

    // closed before returning, whatever the transfer does next
    async fn write_artifact(&self, inventory: &Inventory) -> ProvisionResult<()> {
        let mut file = File::create(&self.local_path).await?;
        file.write_all(inventory.render().as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}
