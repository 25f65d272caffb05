//! Migration Reconciler CLI
//!
//! Resolves OpenStack volumes, reconciles ports and boots a server for a VM whose
//! disks have already been copied into pre-created volumes.
//!
//! # Usage
//! ```bash
//! # Check which volume backs each disk
//! migrate-reconciler volumes --inventory vm-42.json
//!
//! # Find or create ports for mapped NICs
//! migrate-reconciler ports --inventory vm-42.json \
//!     --network-mapping mac=00:50:56:aa:bb:cc,network-id=<uuid>,subnet-id=<uuid>
//!
//! # Full pass: volumes, ports, server
//! migrate-reconciler provision --inventory vm-42.json --flavor m1.large \
//!     --network-mapping mac=00:50:56:aa:bb:cc,network-id=<uuid>
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use migrate_reconciler::config::OpenStackArgs;
use migrate_reconciler::openstack::client::connect_until_cancelled;
use migrate_reconciler::{
    MigrationReconciler, NetworkMappings, ReconcileError, ReconcileOptions, SourceVm, VmSnapshot,
};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "migrate-reconciler")]
#[command(about = "Reconcile a migrated VM into OpenStack volumes, ports and a server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    openstack: OpenStackArgs,

    /// Give up (cancel) after this many seconds
    #[arg(long, global = true, env = "MIGRATE_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "MIGRATE_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct VmArgs {
    /// JSON inventory of the source VM (id, name, disks, nics)
    #[arg(long)]
    inventory: PathBuf,
}

#[derive(Args)]
struct NetworkArgs {
    /// mac=<MAC>,network-id=<UUID>[,subnet-id=<UUID>][,ip=<IP>]
    #[arg(long = "network-mapping")]
    network_mappings: Vec<String>,

    /// Security groups for ports on a mapped subnet
    #[arg(long, value_delimiter = ',')]
    security_groups: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the volume backing each disk
    Volumes {
        #[command(flatten)]
        vm: VmArgs,

        /// Match volumes by name only, ignoring ownership metadata
        #[arg(long)]
        vz_unsafe_volume_by_name: bool,
    },

    /// Find or create ports for mapped NICs
    Ports {
        #[command(flatten)]
        vm: VmArgs,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Resolve volumes, reconcile ports and create the server
    Provision {
        #[command(flatten)]
        vm: VmArgs,

        #[command(flatten)]
        network: NetworkArgs,

        /// Flavor ID for the server
        #[arg(long)]
        flavor: String,

        /// Match volumes by name only, ignoring ownership metadata
        #[arg(long)]
        vz_unsafe_volume_by_name: bool,

        /// Seconds to wait for the server to become ACTIVE
        #[arg(long, default_value = "300")]
        active_timeout_secs: u64,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

/// A subcommand with its inputs loaded and validated
enum Job {
    Volumes {
        vm: VmSnapshot,
        options: ReconcileOptions,
    },
    Ports {
        vm: VmSnapshot,
        mappings: NetworkMappings,
        options: ReconcileOptions,
    },
    Provision {
        vm: VmSnapshot,
        mappings: NetworkMappings,
        flavor: String,
        options: ReconcileOptions,
    },
}

impl Job {
    /// Read the inventory and parse mappings; no network access
    fn load(command: Commands) -> Result<Self> {
        let job = match command {
            Commands::Volumes {
                vm,
                vz_unsafe_volume_by_name,
            } => Job::Volumes {
                vm: VmSnapshot::load(&vm.inventory)?,
                options: ReconcileOptions::default().unsafe_volume_by_name(vz_unsafe_volume_by_name),
            },

            Commands::Ports { vm, network } => Job::Ports {
                vm: VmSnapshot::load(&vm.inventory)?,
                mappings: NetworkMappings::parse_all(&network.network_mappings)?,
                options: ReconcileOptions::default().security_groups(network.security_groups),
            },

            Commands::Provision {
                vm,
                network,
                flavor,
                vz_unsafe_volume_by_name,
                active_timeout_secs,
            } => Job::Provision {
                vm: VmSnapshot::load(&vm.inventory)?,
                mappings: NetworkMappings::parse_all(&network.network_mappings)?,
                flavor,
                options: ReconcileOptions::default()
                    .unsafe_volume_by_name(vz_unsafe_volume_by_name)
                    .security_groups(network.security_groups)
                    .active_timeout(Duration::from_secs(active_timeout_secs)),
            },
        };

        Ok(job)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs)?;

    let job = Job::load(cli.command)?;

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, cli.deadline_secs);

    let clients = connect_until_cancelled(&cli.openstack, &cancel)
        .await
        .context("Failed to connect to OpenStack")?;

    match job {
        Job::Volumes { vm, options } => {
            let reconciler = MigrationReconciler::new(&clients, options);

            println!("\n{:<8} {:<24} {:<38} {:<10}", "DISK", "LEGACY ID", "VOLUME", "STATUS");
            println!("{}", "-".repeat(82));

            for disk in &vm.devices.disks {
                let volume = reconciler.resolve_volume(&vm, disk, &cancel).await?;
                println!(
                    "{:<8} {:<24} {:<38} {:<10}",
                    disk.key, disk.legacy_object_id, volume.id, volume.status
                );
            }
        }

        Job::Ports {
            vm,
            mappings,
            options,
        } => {
            let reconciler = MigrationReconciler::new(&clients, options);

            let ports = reconciler.reconcile_ports(&vm, &mappings, &cancel).await?;
            print_ports(&ports);
        }

        Job::Provision {
            vm,
            mappings,
            flavor,
            options,
        } => {
            let reconciler = MigrationReconciler::new(&clients, options);

            info!(vm = %vm.id(), "Provisioning server");

            match reconciler.run(&vm, &flavor, &mappings, &cancel).await {
                Ok(outcome) => {
                    print_ports(&outcome.ports);
                    println!("\nServer {} ({}) is ACTIVE", outcome.instance.name, outcome.instance.id);
                }
                Err(e) => {
                    report_failure(&e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

/// Cancel on Ctrl-C and, if configured, when the deadline passes
fn spawn_cancel_triggers(cancel: &CancellationToken, deadline_secs: Option<u64>) {
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Some(secs) = deadline_secs {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(deadline_secs = secs, "Deadline reached, cancelling");
            on_deadline.cancel();
        });
    }
}

fn print_ports(ports: &[migrate_reconciler::ReconciledPort]) {
    println!("\n{:<20} {:<38} {:<38} {:<8}", "MAC", "PORT", "NETWORK", "ACTION");
    println!("{}", "-".repeat(106));

    for port in ports {
        let action = match port.action {
            migrate_reconciler::PortAction::Created => "created",
            migrate_reconciler::PortAction::Reused => "reused",
        };
        println!(
            "{:<20} {:<38} {:<38} {:<8}",
            port.mac, port.port_id, port.network_id, action
        );
    }
}

fn report_failure(err: &ReconcileError) {
    match err.created_instance() {
        Some(id) => error!(
            instance = %id,
            error = %err,
            "Server was created but is not verified ACTIVE; inspect it before retrying"
        ),
        None => error!(error = %err, "Reconciliation failed; no server was created"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(extra: &[&str]) -> Cli {
        let mut argv = vec![
            "migrate-reconciler",
            "--auth-url",
            "https://keystone.example.com/v3",
            "--username",
            "migrate",
            "--password",
            "secret",
        ];
        argv.extend_from_slice(extra);
        Cli::try_parse_from(argv).unwrap()
    }

    fn inventory() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{"id": "vm-42", "name": "web-01",
                 "disks": [{"key": 2000, "legacy_object_id": "42-2000"}],
                 "nics": [{"mac": "00:50:56:aa:bb:01"}]}"#,
        )
        .unwrap();
        file
    }

    #[test]
    fn test_bad_mapping_fails_before_connecting() {
        let file = inventory();
        let path = file.path().to_str().unwrap();
        let cli = cli(&[
            "ports",
            "--inventory",
            path,
            "--network-mapping",
            "mac=00:50:56:aa:bb:01,network-id=not-a-uuid",
        ]);

        let err = Job::load(cli.command).err().unwrap();
        assert!(err.to_string().contains("invalid network mapping"));
    }

    #[test]
    fn test_missing_inventory_fails_before_connecting() {
        let cli = cli(&["volumes", "--inventory", "/nonexistent/vm.json"]);

        let err = Job::load(cli.command).err().unwrap();
        assert!(err.to_string().contains("Failed to read VM inventory"));
    }

    #[test]
    fn test_provision_job_carries_options() {
        let file = inventory();
        let path = file.path().to_str().unwrap();
        let cli = cli(&[
            "provision",
            "--inventory",
            path,
            "--flavor",
            "m1.large",
            "--network-mapping",
            "mac=00:50:56:aa:bb:01,network-id=6f1c2a4e-0d7b-4c1e-9a57-3f2b8c9d0e11",
            "--security-groups",
            "sg-web,sg-ssh",
            "--active-timeout-secs",
            "60",
        ]);

        match Job::load(cli.command).unwrap() {
            Job::Provision {
                vm,
                mappings,
                flavor,
                options,
            } => {
                assert_eq!(vm.id, "vm-42");
                assert_eq!(mappings.len(), 1);
                assert_eq!(flavor, "m1.large");
                assert_eq!(options.security_groups, vec!["sg-web", "sg-ssh"]);
                assert_eq!(options.active_timeout, Duration::from_secs(60));
            }
            _ => panic!("expected a provision job"),
        }
    }
}
