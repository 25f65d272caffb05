//! Reconciliation Types
//!
//! Source-side inventory (disks, NICs) and the target-side objects the
//! reconcilers find or create (volumes, ports, instances).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A MAC address, normalised to lower case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = !s.is_empty()
            && s.split(':').all(|octet| {
                octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit())
            });

        if !valid {
            return Err(format!("invalid MAC address: '{}'", s));
        }

        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================
// Source VM inventory
// ============================================================

/// A virtual disk on the source VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDisk {
    /// Per-VM device key (current volume naming scheme)
    pub key: i32,
    /// Disk object identifier (legacy volume naming scheme)
    pub legacy_object_id: String,
}

/// A network interface on the source VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNic {
    pub mac: MacAddress,
    /// Device label, e.g. "Network adapter 1"
    #[serde(default)]
    pub label: String,
    /// Device summary, e.g. the backing port group name
    #[serde(default)]
    pub summary: String,
}

// ============================================================
// Target cloud objects
// ============================================================

/// A block-storage volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetVolume {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    /// Size in GiB
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A fixed IP assignment on a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// A network port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPort {
    pub id: String,
    pub network_id: String,
    pub mac_address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub status: String,
}

/// Reference to a port, in the order the instance should attach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    #[serde(rename = "port")]
    pub port_id: String,
}

impl From<&TargetPort> for PortRef {
    fn from(port: &TargetPort) -> Self {
        Self {
            port_id: port.id.clone(),
        }
    }
}

/// Where a block device's data comes from / goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceKind {
    Volume,
}

/// One entry of a server's block-device mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub boot_index: u32,
    pub source_type: BlockDeviceKind,
    pub destination_type: BlockDeviceKind,
    #[serde(rename = "uuid")]
    pub volume_id: String,
}

impl BlockDevice {
    /// Attach an existing volume at the given boot position
    pub fn volume(boot_index: u32, volume_id: impl Into<String>) -> Self {
        Self {
            boot_index,
            source_type: BlockDeviceKind::Volume,
            destination_type: BlockDeviceKind::Volume,
            volume_id: volume_id.into(),
        }
    }
}

/// Compute instance status as reported by the compute service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Building,
    Active,
    Error,
    Other(String),
}

impl From<&str> for InstanceStatus {
    fn from(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "BUILD" => InstanceStatus::Building,
            "ACTIVE" => InstanceStatus::Active,
            "ERROR" => InstanceStatus::Error,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Building => write!(f, "BUILD"),
            InstanceStatus::Active => write!(f, "ACTIVE"),
            InstanceStatus::Error => write!(f, "ERROR"),
            InstanceStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// The compute instance created for a migrated VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInstance {
    pub id: String,
    pub name: String,
    pub flavor_ref: String,
    pub ports: Vec<PortRef>,
    pub block_devices: Vec<BlockDevice>,
    pub status: InstanceStatus,
}
