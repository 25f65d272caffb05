//! Volume Resolution
//!
//! Finds the pre-created volume that backs a source disk. Volumes are looked
//! up by a deterministic name plus ownership metadata. Volumes created by
//! older releases used a different name and disk identifier, so when the
//! current scheme finds nothing the legacy scheme is tried next. Each scheme
//! is judged on its own results: zero matches falls through, more than one is
//! ambiguous.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::until_cancelled;
use crate::error::{ReconcileError, ResourceKind, Result};
use crate::openstack::{BlockStorage, VolumeQuery, VolumeSummary};
use crate::types::{SourceDisk, TargetVolume};

/// Metadata key marking volumes prepared for migration
pub const OWNER_METADATA_KEY: &str = "migrate_kit";

/// Volume name under the current scheme
pub fn volume_name(vm_id: &str, disk: &SourceDisk) -> String {
    format!("{}-{}", vm_id, disk.key)
}

/// Volume name under the legacy scheme
pub fn legacy_volume_name(vm_id: &str, disk: &SourceDisk) -> String {
    format!("{}-{}", vm_id, disk.legacy_object_id)
}

/// Naming and metadata conventions, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingScheme {
    Current,
    Legacy,
}

impl NamingScheme {
    pub const LOOKUP_ORDER: [NamingScheme; 2] = [NamingScheme::Current, NamingScheme::Legacy];

    /// Build the list filter for a disk under this scheme
    ///
    /// `by_name_only` drops the metadata filter for the current scheme; legacy
    /// lookups always require metadata.
    pub fn query(&self, vm_id: &str, disk: &SourceDisk, by_name_only: bool) -> VolumeQuery {
        let (name, disk_id) = match self {
            NamingScheme::Current => (volume_name(vm_id, disk), disk.key.to_string()),
            NamingScheme::Legacy => (
                legacy_volume_name(vm_id, disk),
                disk.legacy_object_id.clone(),
            ),
        };

        let metadata = if by_name_only && *self == NamingScheme::Current {
            None
        } else {
            Some(BTreeMap::from([
                (OWNER_METADATA_KEY.to_string(), "true".to_string()),
                ("vm".to_string(), vm_id.to_string()),
                ("disk".to_string(), disk_id),
            ]))
        };

        VolumeQuery { name, metadata }
    }
}

impl std::fmt::Display for NamingScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamingScheme::Current => write!(f, "current"),
            NamingScheme::Legacy => write!(f, "legacy"),
        }
    }
}

/// Resolves source disks to target volumes
#[derive(Clone)]
pub struct VolumeResolver {
    storage: Arc<dyn BlockStorage>,
    unsafe_by_name: bool,
}

impl VolumeResolver {
    pub fn new(storage: Arc<dyn BlockStorage>, unsafe_by_name: bool) -> Self {
        Self {
            storage,
            unsafe_by_name,
        }
    }

    /// Resolve the single volume backing `disk` of VM `vm_id`
    pub async fn resolve(
        &self,
        vm_id: &str,
        disk: &SourceDisk,
        cancel: &CancellationToken,
    ) -> Result<TargetVolume> {
        let mut tried = Vec::new();

        for scheme in NamingScheme::LOOKUP_ORDER {
            let query = scheme.query(vm_id, disk, self.unsafe_by_name);
            let matches = until_cancelled(cancel, self.storage.list_volumes(&query)).await??;

            debug!(vm = %vm_id, disk = disk.key, %scheme, found = matches.len(), "Volume lookup");

            match matches.as_slice() {
                [] => tried.push(query.to_string()),
                [volume] => {
                    if scheme == NamingScheme::Legacy {
                        warn!(
                            vm = %vm_id,
                            disk = disk.key,
                            volume = %volume.id,
                            "Using deprecated volume name and metadata format"
                        );
                    }

                    let volume =
                        until_cancelled(cancel, self.storage.get_volume(&volume.id)).await??;
                    info!(vm = %vm_id, disk = disk.key, volume = %volume.id, "Resolved volume for disk");
                    return Ok(volume);
                }
                many => {
                    return Err(ReconcileError::Ambiguous {
                        resource: ResourceKind::Volume,
                        query: query.to_string(),
                        matches: many.iter().map(|v: &VolumeSummary| v.id.clone()).collect(),
                    })
                }
            }
        }

        Err(ReconcileError::not_found(
            ResourceKind::Volume,
            tried.join(" or "),
        ))
    }
}
