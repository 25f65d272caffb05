//! Source VM Inventory
//!
//! The hypervisor side of a migration is an external collaborator. It hands
//! the reconcilers a VM identity and its devices, already split into disks
//! and NICs in hypervisor enumeration order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{MacAddress, SourceDisk, SourceNic};

/// Devices of a source VM, in the order the hypervisor lists them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInventory {
    #[serde(default)]
    pub disks: Vec<SourceDisk>,
    #[serde(default)]
    pub nics: Vec<SourceNic>,
}

impl DeviceInventory {
    pub fn nic_by_mac(&self, mac: &MacAddress) -> Option<&SourceNic> {
        self.nics.iter().find(|nic| &nic.mac == mac)
    }
}

/// Handle to the VM being migrated
#[async_trait]
pub trait SourceVm: Send + Sync {
    /// Hypervisor reference of the VM (e.g. `vm-42`)
    fn id(&self) -> &str;

    /// Configured display name
    async fn display_name(&self) -> Result<String>;

    /// Disk and NIC inventory
    async fn devices(&self) -> Result<DeviceInventory>;
}

/// A point-in-time copy of a source VM, usually exported by the transfer
/// pipeline as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSnapshot {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub devices: DeviceInventory,
}

impl VmSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read VM inventory: {:?}", path))?;

        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse VM inventory: {:?}", path))
    }
}

#[async_trait]
impl SourceVm for VmSnapshot {
    fn id(&self) -> &str {
        &self.id
    }

    async fn display_name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    async fn devices(&self) -> Result<DeviceInventory> {
        Ok(self.devices.clone())
    }
}
