//! Target Cloud Services
//!
//! Trait-based abstractions over the block-storage, networking and compute
//! APIs the reconcilers talk to. `client` provides the OpenStack REST
//! implementations; anything else (an in-memory cloud in tests, a recording
//! proxy) can stand in behind the same traits.

pub mod auth;
pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::types::{BlockDevice, FixedIp, PortRef, TargetPort, TargetVolume};

pub use client::{BlockStorageClient, ComputeClient, NetworkingClient};

// ============================================================
// Request / Response Types
// ============================================================

/// Volume list filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeQuery {
    pub name: String,
    /// Metadata that every returned volume must carry
    pub metadata: Option<BTreeMap<String, String>>,
}

impl VolumeQuery {
    /// Metadata filter in the dict form the block-storage API parses
    pub fn metadata_filter(&self) -> Option<String> {
        self.metadata.as_ref().map(|metadata| {
            let pairs: Vec<String> = metadata
                .iter()
                .map(|(k, v)| format!("'{}':'{}'", k, v))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        })
    }
}

impl std::fmt::Display for VolumeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "name '{}'", self.name)?;
        if let Some(filter) = self.metadata_filter() {
            write!(f, " with metadata {}", filter)?;
        }
        Ok(())
    }
}

/// Entry of a volume listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Port list filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortQuery {
    pub network_id: String,
    pub mac_address: String,
}

impl std::fmt::Display for PortQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "network {}, mac {}", self.network_id, self.mac_address)
    }
}

/// Body of a port creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortCreateRequest {
    pub network_id: String,
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ips: Option<Vec<FixedIp>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,
}

/// Body of a server creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerCreateRequest {
    pub name: String,
    #[serde(rename = "flavorRef")]
    pub flavor_ref: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<PortRef>,
    pub block_device_mapping_v2: Vec<BlockDevice>,
}

/// Fault details attached to a failed server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerFault {
    #[serde(default)]
    pub message: String,
}

/// Server as returned by the compute API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fault: Option<ServerFault>,
}

// ============================================================
// Service Traits
// ============================================================

/// Block-storage (volume) service
#[async_trait]
pub trait BlockStorage: Send + Sync {
    async fn list_volumes(&self, query: &VolumeQuery) -> Result<Vec<VolumeSummary>, ApiError>;

    async fn get_volume(&self, id: &str) -> Result<TargetVolume, ApiError>;
}

/// Networking (port) service
#[async_trait]
pub trait Networking: Send + Sync {
    async fn list_ports(&self, query: &PortQuery) -> Result<Vec<TargetPort>, ApiError>;

    async fn create_port(&self, request: &PortCreateRequest) -> Result<TargetPort, ApiError>;
}

/// Compute (server) service
#[async_trait]
pub trait Compute: Send + Sync {
    /// Submit a server creation request; the server is usually still building
    async fn create_server(&self, request: &ServerCreateRequest) -> Result<Server, ApiError>;

    async fn get_server(&self, id: &str) -> Result<Server, ApiError>;
}

/// Connected clients for the three target services
#[derive(Clone)]
pub struct ClientSet {
    pub block_storage: Arc<dyn BlockStorage>,
    pub compute: Arc<dyn Compute>,
    pub networking: Arc<dyn Networking>,
}

impl std::fmt::Debug for ClientSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSet").finish_non_exhaustive()
    }
}

impl ClientSet {
    pub fn new(
        block_storage: Arc<dyn BlockStorage>,
        compute: Arc<dyn Compute>,
        networking: Arc<dyn Networking>,
    ) -> Self {
        Self {
            block_storage,
            compute,
            networking,
        }
    }
}
