//! In-memory target cloud shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use migrate_reconciler::openstack::{
    BlockStorage, Compute, Networking, PortCreateRequest, PortQuery, Server, ServerCreateRequest,
    ServerFault, VolumeQuery, VolumeSummary,
};
use migrate_reconciler::types::{SourceDisk, SourceNic, TargetPort, TargetVolume};
use migrate_reconciler::{ApiError, ClientSet, DeviceInventory, VmSnapshot};

pub const VM_ID: &str = "vm-42";
pub const NETWORK_ID: &str = "6f1c2a4e-0d7b-4c1e-9a57-3f2b8c9d0e11";
pub const SUBNET_ID: &str = "9a0b1c2d-3e4f-4a5b-8c6d-7e8f9a0b1c2d";
pub const MAC_1: &str = "00:50:56:aa:bb:01";
pub const MAC_2: &str = "00:50:56:aa:bb:02";

#[derive(Default)]
struct State {
    volumes: Vec<TargetVolume>,
    ports: Vec<TargetPort>,
    servers: HashMap<String, Server>,
    /// Statuses handed out by successive `get_server` calls
    status_script: VecDeque<String>,
    /// Status once the script is exhausted
    final_status: String,
    fault: Option<String>,
    fail_polls: bool,

    volume_queries: Vec<VolumeQuery>,
    port_requests: Vec<PortCreateRequest>,
    server_requests: Vec<ServerCreateRequest>,
    polls: usize,
    next_id: u32,
}

/// Block storage, networking and compute backed by a mutex-guarded state
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                final_status: "ACTIVE".to_string(),
                ..Default::default()
            }),
        })
    }

    pub fn clients(self: &Arc<Self>) -> ClientSet {
        ClientSet::new(self.clone(), self.clone(), self.clone())
    }

    pub fn add_volume(&self, id: &str, name: &str, metadata: &[(&str, &str)]) {
        self.state.lock().unwrap().volumes.push(TargetVolume {
            id: id.to_string(),
            name: Some(name.to_string()),
            status: "available".to_string(),
            size: 20,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    /// Volume under the current naming scheme
    pub fn add_current_volume(&self, id: &str, disk: &SourceDisk) {
        let key = disk.key.to_string();
        self.add_volume(
            id,
            &format!("{}-{}", VM_ID, disk.key),
            &[("migrate_kit", "true"), ("vm", VM_ID), ("disk", &key)],
        );
    }

    /// Volume under the legacy naming scheme
    pub fn add_legacy_volume(&self, id: &str, disk: &SourceDisk) {
        self.add_volume(
            id,
            &format!("{}-{}", VM_ID, disk.legacy_object_id),
            &[
                ("migrate_kit", "true"),
                ("vm", VM_ID),
                ("disk", &disk.legacy_object_id),
            ],
        );
    }

    pub fn add_port(&self, id: &str, network_id: &str, mac: &str) {
        self.state.lock().unwrap().ports.push(TargetPort {
            id: id.to_string(),
            network_id: network_id.to_string(),
            mac_address: mac.to_string(),
            name: String::new(),
            description: String::new(),
            fixed_ips: Vec::new(),
            security_groups: Vec::new(),
            status: "DOWN".to_string(),
        });
    }

    /// Servers report these statuses in order, then `final_status`
    pub fn script_statuses(&self, statuses: &[&str], final_status: &str) {
        let mut state = self.state.lock().unwrap();
        state.status_script = statuses.iter().map(|s| s.to_string()).collect();
        state.final_status = final_status.to_string();
    }

    pub fn set_fault(&self, message: &str) {
        self.state.lock().unwrap().fault = Some(message.to_string());
    }

    pub fn fail_polls(&self) {
        self.state.lock().unwrap().fail_polls = true;
    }

    pub fn volume_queries(&self) -> Vec<VolumeQuery> {
        self.state.lock().unwrap().volume_queries.clone()
    }

    pub fn port_requests(&self) -> Vec<PortCreateRequest> {
        self.state.lock().unwrap().port_requests.clone()
    }

    pub fn server_requests(&self) -> Vec<ServerCreateRequest> {
        self.state.lock().unwrap().server_requests.clone()
    }

    pub fn port_count(&self) -> usize {
        self.state.lock().unwrap().ports.len()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    fn next_id(state: &mut State, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

fn matches_query(volume: &TargetVolume, query: &VolumeQuery) -> bool {
    if volume.name.as_deref() != Some(query.name.as_str()) {
        return false;
    }
    match &query.metadata {
        Some(required) => required
            .iter()
            .all(|(k, v)| volume.metadata.get(k) == Some(v)),
        None => true,
    }
}

#[async_trait]
impl BlockStorage for FakeCloud {
    async fn list_volumes(&self, query: &VolumeQuery) -> Result<Vec<VolumeSummary>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.volume_queries.push(query.clone());

        Ok(state
            .volumes
            .iter()
            .filter(|v| matches_query(v, query))
            .map(|v| VolumeSummary {
                id: v.id.clone(),
                name: v.name.clone(),
            })
            .collect())
    }

    async fn get_volume(&self, id: &str) -> Result<TargetVolume, ApiError> {
        let state = self.state.lock().unwrap();
        state
            .volumes
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                service: "volumev3",
                status: 404,
                body: format!("volume {} not found", id),
            })
    }
}

#[async_trait]
impl Networking for FakeCloud {
    async fn list_ports(&self, query: &PortQuery) -> Result<Vec<TargetPort>, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ports
            .iter()
            .filter(|p| p.network_id == query.network_id && p.mac_address == query.mac_address)
            .cloned()
            .collect())
    }

    async fn create_port(&self, request: &PortCreateRequest) -> Result<TargetPort, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.port_requests.push(request.clone());

        let port = TargetPort {
            id: Self::next_id(&mut state, "port"),
            network_id: request.network_id.clone(),
            mac_address: request.mac_address.clone(),
            name: request.name.clone().unwrap_or_default(),
            description: request.description.clone().unwrap_or_default(),
            fixed_ips: request.fixed_ips.clone().unwrap_or_default(),
            security_groups: request.security_groups.clone().unwrap_or_default(),
            status: "DOWN".to_string(),
        };
        state.ports.push(port.clone());
        Ok(port)
    }
}

#[async_trait]
impl Compute for FakeCloud {
    async fn create_server(&self, request: &ServerCreateRequest) -> Result<Server, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.server_requests.push(request.clone());

        let server = Server {
            id: Self::next_id(&mut state, "server"),
            name: request.name.clone(),
            status: "BUILD".to_string(),
            fault: None,
        };
        state.servers.insert(server.id.clone(), server.clone());
        Ok(server)
    }

    async fn get_server(&self, id: &str) -> Result<Server, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;

        if state.fail_polls {
            return Err(ApiError::Status {
                service: "compute",
                status: 503,
                body: "service unavailable".to_string(),
            });
        }

        let status = match state.status_script.pop_front() {
            Some(status) => status,
            None => state.final_status.clone(),
        };
        let fault = state.fault.clone().map(|message| ServerFault { message });

        let server = state.servers.get_mut(id).ok_or_else(|| ApiError::Status {
            service: "compute",
            status: 404,
            body: format!("server {} not found", id),
        })?;
        server.status = status;
        if server.status == "ERROR" {
            server.fault = fault;
        }
        Ok(server.clone())
    }
}

pub fn disk(key: i32) -> SourceDisk {
    SourceDisk {
        key,
        legacy_object_id: format!("42-{}", key),
    }
}

pub fn nic(mac: &str, label: &str) -> SourceNic {
    SourceNic {
        mac: mac.parse().unwrap(),
        label: label.to_string(),
        summary: "VM Network".to_string(),
    }
}

/// Two disks (2000, 2001) and two NICs
pub fn vm() -> VmSnapshot {
    VmSnapshot {
        id: VM_ID.to_string(),
        name: "web-01".to_string(),
        devices: DeviceInventory {
            disks: vec![disk(2000), disk(2001)],
            nics: vec![
                nic(MAC_1, "Network adapter 1"),
                nic(MAC_2, "Network adapter 2"),
            ],
        },
    }
}
