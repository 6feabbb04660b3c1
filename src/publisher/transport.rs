use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{ProvisionError, ProvisionResult};

/// `user@host:path` on the master node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: IpAddr,
    pub path: String,
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            IpAddr::V4(host) => write!(f, "{}@{}:{}", self.user, host, self.path),
            IpAddr::V6(host) => write!(f, "{}@[{}]:{}", self.user, host, self.path),
        }
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Copies `local` to `target`. Ok only if the copy was confirmed.
    async fn copy(&self, local: &Path, target: &RemoteTarget) -> ProvisionResult<()>;
}

/// Copies files with the system `scp`, non-interactively.
#[derive(Debug, Clone)]
pub struct ScpTransport {
    program: String,
    identity_file: Option<PathBuf>,
}

impl ScpTransport {
    pub fn new(program: impl Into<String>, identity_file: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            identity_file: identity_file.map(expand_home),
        }
    }

    fn args(&self, local: &Path, target: &RemoteTarget) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        args.push(local.display().to_string());
        args.push(target.to_string());
        args
    }
}

#[async_trait]
impl RemoteTransport for ScpTransport {
    async fn copy(&self, local: &Path, target: &RemoteTarget) -> ProvisionResult<()> {
        let args = self.args(local, target);
        debug!(program = %self.program, ?args, "Executing remote copy");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| ProvisionError::TransferFailed {
                destination: target.to_string(),
                message: format!("failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(ProvisionError::TransferFailed {
                destination: target.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|p| p.strip_prefix("~/")) {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
            PathBuf::from(home).join(rest)
        }
        None => path,
    }
}
