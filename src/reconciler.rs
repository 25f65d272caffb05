//! Migration Reconciler
//!
//! Drives the three reconciliation steps for one VM:
//!
//! 1. resolve a volume for every disk (read-only)
//! 2. find or create a port for every network mapping
//! 3. submit the server and wait for it to become ACTIVE
//!
//! Volumes are resolved first so that a missing or ambiguous volume aborts
//! the pass before any port is created.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cancel::until_cancelled;
use crate::config::ReconcileOptions;
use crate::error::{ReconcileError, Result};
use crate::instance::{InstancePlan, InstanceProvisioner};
use crate::mapping::NetworkMappings;
use crate::openstack::ClientSet;
use crate::port::{port_refs, PortReconciler, ReconciledPort};
use crate::source::SourceVm;
use crate::types::{PortRef, SourceDisk, TargetInstance, TargetVolume};
use crate::volume::VolumeResolver;

/// Result of a full reconciliation pass
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub ports: Vec<ReconciledPort>,
    pub instance: TargetInstance,
}

/// Reconciles a source VM into target-cloud volumes, ports and a server
pub struct MigrationReconciler {
    volumes: VolumeResolver,
    ports: PortReconciler,
    instances: InstanceProvisioner,
}

impl MigrationReconciler {
    pub fn new(clients: &ClientSet, options: ReconcileOptions) -> Self {
        let volumes = VolumeResolver::new(
            clients.block_storage.clone(),
            options.unsafe_volume_by_name,
        );
        let ports = PortReconciler::new(clients.networking.clone(), options.security_groups.clone());
        let instances = InstanceProvisioner::new(clients.compute.clone(), volumes.clone(), &options);

        Self {
            volumes,
            ports,
            instances,
        }
    }

    /// Resolve the volume backing one disk
    pub async fn resolve_volume(
        &self,
        vm: &dyn SourceVm,
        disk: &SourceDisk,
        cancel: &CancellationToken,
    ) -> Result<TargetVolume> {
        self.volumes.resolve(vm.id(), disk, cancel).await
    }

    /// Find or create a port for every mapping, in mapping order
    pub async fn reconcile_ports(
        &self,
        vm: &dyn SourceVm,
        mappings: &NetworkMappings,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReconciledPort>> {
        self.ports.reconcile(vm, mappings, cancel).await
    }

    /// Create the server from already-reconciled ports and wait for it
    pub async fn provision_instance(
        &self,
        vm: &dyn SourceVm,
        flavor_ref: &str,
        ports: &[PortRef],
        cancel: &CancellationToken,
    ) -> Result<TargetInstance> {
        self.instances.provision(vm, flavor_ref, ports, cancel).await
    }

    /// Full pass: volumes, then ports, then the server
    pub async fn run(
        &self,
        vm: &dyn SourceVm,
        flavor_ref: &str,
        mappings: &NetworkMappings,
        cancel: &CancellationToken,
    ) -> Result<MigrationOutcome> {
        info!(vm = %vm.id(), flavor = %flavor_ref, mappings = mappings.len(), "Reconciling VM");

        let name = until_cancelled(cancel, vm.display_name())
            .await?
            .map_err(ReconcileError::Source)?;
        let devices = until_cancelled(cancel, vm.devices())
            .await?
            .map_err(ReconcileError::Source)?;

        let block_devices = self
            .instances
            .block_devices(vm.id(), &devices.disks, cancel)
            .await?;

        let ports = self
            .ports
            .reconcile_nics(vm.id(), &devices, mappings, cancel)
            .await?;

        let plan = InstancePlan {
            name,
            block_devices,
        };
        let instance = self
            .instances
            .submit(plan, flavor_ref, &port_refs(&ports), cancel)
            .await?;

        Ok(MigrationOutcome { ports, instance })
    }
}
