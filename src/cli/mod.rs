/*
* Spark Deploy Command Line Interface
* -----------------------------------
*
* Command Structure:
* ---------------
* spark-deploy [--config <file>]
* ├── deploy      // create slaves, collect their addresses, ship the host list
* │     -c/--name, -n/--num-slaves, -m/--master-ip, -v/--verbose, -y/--yes, --json
* ├── publish     // re-send an existing host list to the master
* │     --hosts-file, -m/--master-ip
* └── init        // write config/default.toml
*
* Flags fall back to the [cluster] section of the configuration.
* Confirmation questions come from the pre-flight policy; `--yes` answers
* all of them.
*
* Usage Examples:
* -------------
* ```bash
* spark-deploy deploy -c analytics -n 4 -m 193.10.64.2
* spark-deploy publish --hosts-file slaves -m 193.10.64.2
* ```
*/

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::ConfigError;
use dialoguer::Confirm;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cluster::{Approval, ClusterDeployer, ClusterRequest, DeploymentReport, PolicyDecision, PublishOutcome};
use crate::config::Settings;
use crate::publisher::Inventory;

#[derive(Parser)]
#[command(name = "spark-deploy")]
#[command(about = "Create a Spark cluster on an OpenNebula cloud", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create slave VMs and deliver their addresses to the master
    Deploy {
        /// Name for the cluster
        #[arg(short = 'c', long = "name")]
        cluster_name: Option<String>,
        /// Number of slave nodes to spawn
        #[arg(short = 'n', long)]
        num_slaves: Option<u32>,
        /// IP address of the master
        #[arg(short = 'm', long)]
        master_ip: Option<String>,
        #[arg(short, long)]
        verbose: bool,
        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,
        /// Print the deployment report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send an existing host list to the master again
    Publish {
        #[arg(long, value_name = "FILE")]
        hosts_file: Option<PathBuf>,
        #[arg(short = 'm', long)]
        master_ip: Option<String>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (settings, source) = load_settings(cli.config.as_deref())?;

    let verbose = match &cli.command {
        Commands::Deploy { verbose, .. } | Commands::Publish { verbose, .. } => *verbose,
        Commands::Init { .. } => false,
    };
    // the subscriber depends on the settings, so the load is logged afterwards
    init_tracing(verbose || settings.cluster.verbose);
    info!(source = %source, "Loaded configuration");

    match cli.command {
        Commands::Deploy {
            cluster_name,
            num_slaves,
            master_ip,
            verbose,
            yes,
            json,
        } => {
            let request = ClusterRequest {
                cluster_name: cluster_name.unwrap_or_else(|| settings.cluster.name.clone()),
                slave_count: num_slaves.unwrap_or(settings.cluster.num_slaves),
                master_address: master_ip.unwrap_or_else(|| settings.cluster.master_ip.clone()),
                verbose: verbose || settings.cluster.verbose,
            };
            handle_deploy(request, &settings, yes, json).await
        }
        Commands::Publish {
            hosts_file,
            master_ip,
            ..
        } => {
            let hosts_file = hosts_file.unwrap_or_else(|| settings.publish.hosts_file.clone());
            let master = master_ip.unwrap_or_else(|| settings.cluster.master_ip.clone());
            handle_publish(hosts_file, master, &settings).await
        }
        Commands::Init { force } => handle_init_command(force),
    }
}

/// Loads settings and describes where they came from.
fn load_settings(config: Option<&Path>) -> Result<(Settings, String), ConfigError> {
    match config {
        Some(path) => Ok((Settings::new_from_file(path)?, format!("file {}", path.display()))),
        None => Ok((Settings::new()?, format!("path {}", Settings::config_dir()))),
    }
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn handle_deploy(request: ClusterRequest, settings: &Settings, yes: bool, json: bool) -> Result<ExitCode> {
    let deployer = ClusterDeployer::from_settings(settings)?;

    let approval = match deployer.preflight(&request)? {
        PolicyDecision::Approved => Approval::Confirmed,
        PolicyDecision::Rejected(reason) => bail!("request rejected: {}", reason),
        PolicyDecision::NeedsConfirmation(_) if yes => Approval::Confirmed,
        PolicyDecision::NeedsConfirmation(questions) => {
            if confirm_all(&questions)? {
                Approval::Confirmed
            } else {
                println!("OK, give it another try");
                return Ok(ExitCode::SUCCESS);
            }
        }
    };

    if request.slave_count == 0 {
        println!("There are no slaves to create...");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Creating {} slave nodes for {}...", request.slave_count, request.cluster_name.bold());
    let report = deployer.deploy(&request, approval).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, settings);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn confirm_all(questions: &[String]) -> Result<bool> {
    for question in questions {
        let answer = Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .context("confirmation prompt failed, pass --yes to run non-interactively")?;
        if !answer {
            return Ok(false);
        }
    }
    Ok(true)
}

fn print_report(report: &DeploymentReport, settings: &Settings) {
    println!(
        "{} {}/{} slaves provisioned for {} (run {})",
        if report.failures.is_empty() { "✓".green() } else { "!".yellow() },
        report.provisioned.len(),
        report.requested,
        report.cluster_name.bold(),
        report.run_id
    );

    for slave in &report.provisioned {
        println!("  {} {:<24} id {:<8} {}", "✓".green(), slave.name, slave.instance_id, slave.address);
    }
    for failure in &report.failures {
        let instance = match &failure.instance_id {
            Some(id) => format!("instance {}", id),
            None => "no instance id".to_string(),
        };
        println!(
            "  {} {:<24} failed at {} ({}{}): {}",
            "✗".red(),
            failure.name,
            failure.stage,
            instance,
            if failure.orphan_risk { ", VM may still exist" } else { "" },
            failure.message
        );
    }

    match &report.publish {
        PublishOutcome::Delivered(receipt) => {
            println!("{} Host list delivered to {}", "✓".green(), receipt.destination);
        }
        PublishOutcome::Failed { message } => {
            println!("{} Host list not delivered: {}", "✗".red(), message);
            println!(
                "  The host list is kept in {}; retry with `spark-deploy publish`",
                settings.publish.hosts_file.display()
            );
        }
        PublishOutcome::Skipped { reason } => {
            println!("{} Host list not published: {}", "!".yellow(), reason);
        }
    }
}

async fn handle_publish(hosts_file: PathBuf, master: String, settings: &Settings) -> Result<ExitCode> {
    let text = tokio::fs::read_to_string(&hosts_file)
        .await
        .with_context(|| format!("failed to read host list {}", hosts_file.display()))?;
    let inventory = Inventory::parse(&text)?;
    info!(hosts_file = %hosts_file.display(), addresses = inventory.len(), "Re-publishing host list");

    let deployer = ClusterDeployer::from_settings(settings)?;
    match deployer.republish(&inventory, &master).await {
        Ok(receipt) => {
            println!("{} Host list delivered to {}", "✓".green(), receipt.destination);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "Re-publish failed");
            println!("{} {}", "✗".red(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn handle_init_command(force: bool) -> Result<ExitCode> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    std::fs::create_dir_all(&config_dir)?;
    let default_config = crate::config::generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration generated at {}", "✓".green(), target.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_flags_parse() {
        let cli = Cli::try_parse_from([
            "spark-deploy", "deploy", "-c", "alpha", "-n", "3", "-m", "193.10.64.2", "-y",
        ])
        .unwrap();

        match cli.command {
            Commands::Deploy {
                cluster_name,
                num_slaves,
                master_ip,
                yes,
                json,
                ..
            } => {
                assert_eq!(cluster_name.as_deref(), Some("alpha"));
                assert_eq!(num_slaves, Some(3));
                assert_eq!(master_ip.as_deref(), Some("193.10.64.2"));
                assert!(yes);
                assert!(!json);
            }
            _ => panic!("expected deploy"),
        }
    }

    #[test]
    fn test_load_settings_reports_source() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[cluster]\nname = \"beta\"\nnum_slaves = 5").unwrap();

        let (settings, source) = load_settings(Some(file.path())).unwrap();
        assert_eq!(source, format!("file {}", file.path().display()));
        assert_eq!(settings.cluster.name, "beta");
        assert_eq!(settings.cluster.num_slaves, 5);
        assert_eq!(settings.backend.template_command, "onetemplate");
    }

    #[test]
    fn test_load_settings_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(load_settings(Some(&missing)).is_err());
    }
}
