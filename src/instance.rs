//! Instance Provisioning
//!
//! Assembles resolved volumes and reconciled ports into a single server
//! creation request, then waits for the server to become ACTIVE.
//!
//! Every disk is resolved before anything is submitted, so a missing or
//! ambiguous volume never leaves a half-built server behind. Once the
//! creation request is accepted the server is never rolled back: failures
//! from then on carry its ID (see `ReconcileError::created_instance`).

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::until_cancelled;
use crate::config::ReconcileOptions;
use crate::error::{ReconcileError, Result};
use crate::openstack::{Compute, Server, ServerCreateRequest};
use crate::source::SourceVm;
use crate::types::{BlockDevice, InstanceStatus, PortRef, SourceDisk, TargetInstance};
use crate::volume::VolumeResolver;

/// Everything needed to submit a server, minus its ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePlan {
    pub name: String,
    /// One entry per source disk; boot index follows enumeration order
    pub block_devices: Vec<BlockDevice>,
}

/// Creates the target server for a migrated VM
#[derive(Clone)]
pub struct InstanceProvisioner {
    compute: Arc<dyn Compute>,
    volumes: VolumeResolver,
    active_timeout: Duration,
    poll_interval: Duration,
}

impl InstanceProvisioner {
    pub fn new(compute: Arc<dyn Compute>, volumes: VolumeResolver, options: &ReconcileOptions) -> Self {
        Self {
            compute,
            volumes,
            active_timeout: options.active_timeout,
            poll_interval: options.poll_interval,
        }
    }

    /// Resolve, submit and wait: the whole provisioning step for `vm`
    pub async fn provision(
        &self,
        vm: &dyn SourceVm,
        flavor_ref: &str,
        ports: &[PortRef],
        cancel: &CancellationToken,
    ) -> Result<TargetInstance> {
        let plan = self.plan(vm, cancel).await?;
        self.submit(plan, flavor_ref, ports, cancel).await
    }

    /// Read the VM's name and resolve a volume for each of its disks
    pub async fn plan(&self, vm: &dyn SourceVm, cancel: &CancellationToken) -> Result<InstancePlan> {
        let name = until_cancelled(cancel, vm.display_name())
            .await?
            .map_err(ReconcileError::Source)?;
        let devices = until_cancelled(cancel, vm.devices())
            .await?
            .map_err(ReconcileError::Source)?;

        let block_devices = self.block_devices(vm.id(), &devices.disks, cancel).await?;

        Ok(InstancePlan {
            name,
            block_devices,
        })
    }

    /// Block-device mapping for `disks`, in the order given
    pub async fn block_devices(
        &self,
        vm_id: &str,
        disks: &[SourceDisk],
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockDevice>> {
        let mut devices = Vec::with_capacity(disks.len());

        for (index, disk) in disks.iter().enumerate() {
            let volume = self.volumes.resolve(vm_id, disk, cancel).await?;
            devices.push(BlockDevice::volume(index as u32, volume.id));
        }

        Ok(devices)
    }

    /// Submit the server and wait for it to become ACTIVE
    pub async fn submit(
        &self,
        plan: InstancePlan,
        flavor_ref: &str,
        ports: &[PortRef],
        cancel: &CancellationToken,
    ) -> Result<TargetInstance> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled { instance_id: None });
        }

        let request = ServerCreateRequest {
            name: plan.name,
            flavor_ref: flavor_ref.to_string(),
            networks: ports.to_vec(),
            block_device_mapping_v2: plan.block_devices,
        };

        // Not raced against cancellation: once sent, the request must complete
        let submitted_at = Instant::now();
        let server = self.compute.create_server(&request).await?;
        info!(
            instance = %server.id,
            name = %request.name,
            disks = request.block_device_mapping_v2.len(),
            ports = request.networks.len(),
            "Instance creation submitted"
        );

        let server = self
            .wait_for_active(&server.id, submitted_at, cancel)
            .await?;
        info!(instance = %server.id, "Instance is ACTIVE");

        Ok(TargetInstance {
            id: server.id,
            name: request.name,
            flavor_ref: request.flavor_ref,
            ports: request.networks,
            block_devices: request.block_device_mapping_v2,
            status: InstanceStatus::Active,
        })
    }

    /// Poll until ACTIVE, ERROR, the deadline or cancellation
    async fn wait_for_active(
        &self,
        id: &str,
        submitted_at: Instant,
        cancel: &CancellationToken,
    ) -> Result<Server> {
        let deadline = submitted_at + self.active_timeout;

        let timeout = || ReconcileError::Timeout {
            instance_id: id.to_string(),
            waited: submitted_at.elapsed(),
        };
        let cancelled = || ReconcileError::Cancelled {
            instance_id: Some(id.to_string()),
        };

        loop {
            let server = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep_until(deadline) => return Err(timeout()),
                result = self.compute.get_server(id) => result.map_err(|source| ReconcileError::WaitFailed {
                    instance_id: id.to_string(),
                    source,
                })?,
            };

            match InstanceStatus::from(server.status.as_str()) {
                InstanceStatus::Active => return Ok(server),
                InstanceStatus::Error => {
                    let status = match &server.fault {
                        Some(fault) if !fault.message.is_empty() => {
                            format!("ERROR ({})", fault.message)
                        }
                        _ => "ERROR".to_string(),
                    };
                    warn!(instance = %id, %status, "Instance failed to build");
                    return Err(ReconcileError::InstanceFailed {
                        instance_id: id.to_string(),
                        status,
                    });
                }
                status => debug!(instance = %id, %status, "Waiting for instance"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = sleep_until(deadline) => return Err(timeout()),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}
