/*
* Spark Cluster Deployment Configuration
* --------------------------------------
* Configuration hierarchy (lowest to highest priority):
*
* 1. Hardcoded defaults (below)
* 2. <CONFIG_PATH>/default.toml (optional)
* 3. <CONFIG_PATH>/local.toml (optional)
* 4. Environment variables, e.g. SPARK_DEPLOY__CLUSTER__MASTER_IP
*
* Sections:
* - cluster:       values the CLI flags default to
* - backend:       OpenNebula commands and the slave template
* - provisioning:  concurrency, describe retries, confirmation limits
* - publish:       host list file and where it goes on the master
*
* An explicit `--config <file>` replaces steps 2 and 3.
*/

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::ResolveStrategy;

const ENV_PREFIX: &str = "SPARK_DEPLOY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub cluster: ClusterSettings,
    pub backend: BackendSettings,
    pub provisioning: ProvisioningSettings,
    pub publish: PublishSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub name: String,
    pub num_slaves: u32,
    pub master_ip: String,
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub template_command: String,
    pub vm_command: String,
    pub slave_template: String,
    pub resolve_strategy: ResolveStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    pub concurrency: usize,
    pub describe_attempts: u32,
    pub describe_retry_delay_ms: u64,
    pub confirm_threshold: u32,
    pub confirm_cluster_name: bool,
    pub max_slaves: u32,
}

impl ProvisioningSettings {
    pub fn describe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.describe_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    pub hosts_file: PathBuf,
    pub remote_dir: String,
    pub remote_user: String,
    pub identity_file: Option<PathBuf>,
    pub scp_command: String,
}

impl Settings {
    /// Directory searched for `default.toml` and `local.toml`.
    pub fn config_dir() -> String {
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string())
    }

    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir();

        Self::with_defaults()?
            .add_source(File::with_name(&format!("{}/default", config_path)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_path)).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn new_from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::with_defaults()?
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = generate_default_config();
        Config::builder()
            .set_default("cluster.name", defaults.cluster.name)?
            .set_default("cluster.num_slaves", defaults.cluster.num_slaves)?
            .set_default("cluster.master_ip", defaults.cluster.master_ip)?
            .set_default("cluster.verbose", defaults.cluster.verbose)?
            .set_default("backend.template_command", defaults.backend.template_command)?
            .set_default("backend.vm_command", defaults.backend.vm_command)?
            .set_default("backend.slave_template", defaults.backend.slave_template)?
            .set_default("backend.resolve_strategy", "first_match")?
            .set_default("provisioning.concurrency", defaults.provisioning.concurrency as u64)?
            .set_default("provisioning.describe_attempts", defaults.provisioning.describe_attempts)?
            .set_default("provisioning.describe_retry_delay_ms", defaults.provisioning.describe_retry_delay_ms)?
            .set_default("provisioning.confirm_threshold", defaults.provisioning.confirm_threshold)?
            .set_default("provisioning.confirm_cluster_name", defaults.provisioning.confirm_cluster_name)?
            .set_default("provisioning.max_slaves", defaults.provisioning.max_slaves)?
            .set_default("publish.hosts_file", defaults.publish.hosts_file.display().to_string())?
            .set_default("publish.remote_dir", defaults.publish.remote_dir)?
            .set_default("publish.remote_user", defaults.publish.remote_user)?
            .set_default("publish.identity_file", "~/.ssh/id_rsa")?
            .set_default("publish.scp_command", defaults.publish.scp_command)
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        cluster: ClusterSettings {
            name: "spark".to_string(),
            num_slaves: 2,
            master_ip: String::new(),
            verbose: false,
        },
        backend: BackendSettings {
            template_command: "onetemplate".to_string(),
            vm_command: "onevm".to_string(),
            slave_template: "spark-slave".to_string(),
            resolve_strategy: ResolveStrategy::FirstMatch,
        },
        provisioning: ProvisioningSettings {
            concurrency: 1,
            describe_attempts: 1,
            describe_retry_delay_ms: 2000,
            confirm_threshold: 10,
            confirm_cluster_name: true,
            max_slaves: 64,
        },
        publish: PublishSettings {
            hosts_file: PathBuf::from("slaves"),
            remote_dir: "/usr/local/spark/conf/".to_string(),
            remote_user: "admin".to_string(),
            identity_file: Some(PathBuf::from("~/.ssh/id_rsa")),
            scp_command: "scp".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_deserialize() {
        let settings: Settings = Settings::with_defaults()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.backend.template_command, "onetemplate");
        assert_eq!(settings.backend.resolve_strategy, ResolveStrategy::FirstMatch);
        assert_eq!(settings.provisioning.concurrency, 1);
        assert_eq!(settings.provisioning.confirm_threshold, 10);
        assert_eq!(settings.publish.hosts_file, PathBuf::from("slaves"));
        assert_eq!(settings.publish.identity_file, Some(PathBuf::from("~/.ssh/id_rsa")));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[cluster]
name = "alpha"
master_ip = "193.10.64.2"

[backend]
resolve_strategy = "nic_attribute"

[provisioning]
concurrency = 4

[publish]
identity_file = "/keys/deploy"
"#
        )
        .unwrap();

        let settings = Settings::new_from_file(file.path()).unwrap();
        assert_eq!(settings.cluster.name, "alpha");
        assert_eq!(settings.cluster.master_ip, "193.10.64.2");
        assert_eq!(settings.cluster.num_slaves, 2);
        assert_eq!(settings.backend.resolve_strategy, ResolveStrategy::NicAttribute);
        assert_eq!(settings.provisioning.concurrency, 4);
        assert_eq!(settings.publish.identity_file, Some(PathBuf::from("/keys/deploy")));
    }

    #[test]
    fn test_generated_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&generate_default_config()).unwrap();
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.cluster.name, "spark");
        assert_eq!(parsed.publish.remote_dir, "/usr/local/spark/conf/");
    }
}
