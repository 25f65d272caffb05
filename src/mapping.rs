//! Network Mappings
//!
//! User-supplied association of source NIC MAC addresses to target
//! networks. Parsed from repeated `--network-mapping` flags of the form
//! `mac=<MAC>,network-id=<UUID>[,subnet-id=<UUID>][,ip=<IP>]`.

use std::net::IpAddr;
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::error::ReconcileError;
use crate::types::MacAddress;

/// Target placement for one source NIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMapping {
    pub mac: MacAddress,
    pub network_id: Uuid,
    /// `None` requests an unmanaged port (no fixed IP allocation)
    pub subnet_id: Option<Uuid>,
    /// Explicit fixed IP; only meaningful with a subnet
    pub ip_address: Option<IpAddr>,
}

impl NetworkMapping {
    /// Build a mapping, treating the nil UUID as "no subnet"
    ///
    /// An unmanaged port never gets a fixed IP, so an address given without a
    /// subnet is dropped.
    pub fn new(
        mac: MacAddress,
        network_id: Uuid,
        subnet_id: Option<Uuid>,
        ip_address: Option<IpAddr>,
    ) -> Self {
        let subnet_id = subnet_id.filter(|id| !id.is_nil());

        let ip_address = match (subnet_id, ip_address) {
            (None, Some(ip)) => {
                warn!(mac = %mac, ip = %ip, "Ignoring ip for mapping without subnet-id");
                None
            }
            (_, ip) => ip,
        };

        Self {
            mac,
            network_id,
            subnet_id,
            ip_address,
        }
    }

    /// Whether the port for this mapping is created without a fixed IP
    pub fn is_unmanaged(&self) -> bool {
        self.subnet_id.is_none()
    }
}

impl FromStr for NetworkMapping {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |msg: String| ReconcileError::InvalidMapping(msg);

        let mut mac = None;
        let mut network_id = None;
        let mut subnet_id = None;
        let mut ip_address = None;

        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("expected key=value, got '{}'", pair)))?;
            let value = value.trim();

            match key.trim() {
                "mac" => {
                    mac = Some(value.parse::<MacAddress>().map_err(invalid)?);
                }
                "network-id" => {
                    network_id = Some(Uuid::parse_str(value).map_err(|e| {
                        invalid(format!("network-id '{}': {}", value, e))
                    })?);
                }
                "subnet-id" => {
                    subnet_id = Some(Uuid::parse_str(value).map_err(|e| {
                        invalid(format!("subnet-id '{}': {}", value, e))
                    })?);
                }
                "ip" => {
                    ip_address = Some(value.parse::<IpAddr>().map_err(|e| {
                        invalid(format!("ip '{}': {}", value, e))
                    })?);
                }
                other => return Err(invalid(format!("unknown key '{}'", other))),
            }
        }

        let mac = mac.ok_or_else(|| invalid(format!("'{}' is missing mac", s)))?;
        let network_id =
            network_id.ok_or_else(|| invalid(format!("'{}' is missing network-id", s)))?;

        Ok(NetworkMapping::new(mac, network_id, subnet_id, ip_address))
    }
}

/// Ordered mapping table; the order becomes the instance's NIC order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkMappings {
    entries: Vec<NetworkMapping>,
}

impl NetworkMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping; each MAC may be mapped once
    pub fn push(&mut self, mapping: NetworkMapping) -> Result<(), ReconcileError> {
        if self.get(&mapping.mac).is_some() {
            return Err(ReconcileError::InvalidMapping(format!(
                "MAC {} is mapped more than once",
                mapping.mac
            )));
        }
        self.entries.push(mapping);
        Ok(())
    }

    /// Parse a list of `--network-mapping` flag values
    pub fn parse_all<I, S>(values: I) -> Result<Self, ReconcileError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mappings = Self::new();
        for raw in values {
            mappings.push(raw.as_ref().parse()?)?;
        }
        Ok(mappings)
    }

    pub fn get(&self, mac: &MacAddress) -> Option<&NetworkMapping> {
        self.entries.iter().find(|m| &m.mac == mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkMapping> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a NetworkMappings {
    type Item = &'a NetworkMapping;
    type IntoIter = std::slice::Iter<'a, NetworkMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
