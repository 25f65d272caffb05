//! Port Reconciliation
//!
//! For every mapped NIC, find the port already created for its MAC on the
//! target network or create one. Re-running against the same cloud reuses
//! the ports from the previous run instead of creating duplicates.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cancel::until_cancelled;
use crate::error::{ReconcileError, ResourceKind, Result};
use crate::mapping::{NetworkMapping, NetworkMappings};
use crate::openstack::{Networking, PortCreateRequest, PortQuery};
use crate::source::{DeviceInventory, SourceVm};
use crate::types::{FixedIp, MacAddress, PortRef, SourceNic, TargetPort};

/// What reconciliation did for one mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortAction {
    Created,
    Reused,
}

/// Outcome for one mapping, in mapping order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledPort {
    pub mac: MacAddress,
    pub port_id: String,
    pub network_id: String,
    pub action: PortAction,
}

impl From<&ReconciledPort> for PortRef {
    fn from(port: &ReconciledPort) -> Self {
        Self {
            port_id: port.port_id.clone(),
        }
    }
}

/// Port references in attachment order
pub fn port_refs(ports: &[ReconciledPort]) -> Vec<PortRef> {
    ports.iter().map(PortRef::from).collect()
}

/// Build the creation request for a mapped NIC
///
/// Ports on a mapped subnet get a fixed IP request (with the explicit
/// address when one is configured) and the configured security groups.
/// Ports without a subnet are unmanaged: neither is attached.
pub fn port_create_request(
    nic: &SourceNic,
    mapping: &NetworkMapping,
    security_groups: &[String],
) -> PortCreateRequest {
    let mut request = PortCreateRequest {
        network_id: mapping.network_id.to_string(),
        mac_address: mapping.mac.to_string(),
        name: Some(nic.label.clone()).filter(|s| !s.is_empty()),
        description: Some(nic.summary.clone()).filter(|s| !s.is_empty()),
        ..Default::default()
    };

    if let Some(subnet_id) = mapping.subnet_id {
        request.fixed_ips = Some(vec![FixedIp {
            subnet_id: subnet_id.to_string(),
            ip_address: mapping.ip_address.map(|ip| ip.to_string()),
        }]);

        if !security_groups.is_empty() {
            request.security_groups = Some(security_groups.to_vec());
        }
    }

    request
}

/// Finds or creates one port per network mapping
#[derive(Clone)]
pub struct PortReconciler {
    networking: Arc<dyn Networking>,
    security_groups: Vec<String>,
}

impl PortReconciler {
    pub fn new(networking: Arc<dyn Networking>, security_groups: Vec<String>) -> Self {
        Self {
            networking,
            security_groups,
        }
    }

    /// Reconcile ports for every mapping of `vm`
    pub async fn reconcile(
        &self,
        vm: &dyn SourceVm,
        mappings: &NetworkMappings,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReconciledPort>> {
        let devices = until_cancelled(cancel, vm.devices())
            .await?
            .map_err(ReconcileError::Source)?;

        self.reconcile_nics(vm.id(), &devices, mappings, cancel)
            .await
    }

    /// Reconcile ports against an already-fetched NIC inventory
    pub async fn reconcile_nics(
        &self,
        vm_id: &str,
        devices: &DeviceInventory,
        mappings: &NetworkMappings,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReconciledPort>> {
        // Stale mappings abort before anything is created
        let mut mapped = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let nic = devices
                .nic_by_mac(&mapping.mac)
                .ok_or_else(|| ReconcileError::MappingNotFound {
                    mac: mapping.mac.to_string(),
                })?;
            mapped.push((nic, mapping));
        }

        let mut ports = Vec::with_capacity(mapped.len());
        for (nic, mapping) in mapped {
            ports.push(self.ensure_port(vm_id, nic, mapping, cancel).await?);
        }

        Ok(ports)
    }

    async fn ensure_port(
        &self,
        vm_id: &str,
        nic: &SourceNic,
        mapping: &NetworkMapping,
        cancel: &CancellationToken,
    ) -> Result<ReconciledPort> {
        let query = PortQuery {
            network_id: mapping.network_id.to_string(),
            mac_address: mapping.mac.to_string(),
        };

        let existing: Vec<TargetPort> =
            until_cancelled(cancel, self.networking.list_ports(&query)).await??;

        let (port, action) = match existing.as_slice() {
            [] => {
                let request = port_create_request(nic, mapping, &self.security_groups);
                let port = until_cancelled(cancel, self.networking.create_port(&request)).await??;
                info!(
                    vm = %vm_id,
                    port = %port.id,
                    mac = %mapping.mac,
                    network = %mapping.network_id,
                    unmanaged = mapping.is_unmanaged(),
                    "Port created"
                );
                (port, PortAction::Created)
            }
            [port] => {
                info!(vm = %vm_id, port = %port.id, mac = %mapping.mac, "Port already exists");
                (port.clone(), PortAction::Reused)
            }
            many => {
                return Err(ReconcileError::Ambiguous {
                    resource: ResourceKind::Port,
                    query: query.to_string(),
                    matches: many.iter().map(|p| p.id.clone()).collect(),
                })
            }
        };

        Ok(ReconciledPort {
            mac: mapping.mac.clone(),
            port_id: port.id,
            network_id: port.network_id,
            action,
        })
    }
}
