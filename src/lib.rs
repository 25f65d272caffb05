//! Migration Reconciler Library
//!
//! Provisions the target-side objects a migrated VM needs in an OpenStack
//! cloud: resolves pre-created volumes for its disks, finds or creates ports
//! for its mapped NICs, and boots a server wired to both. Every step is safe
//! to re-run after a partial failure.

mod cancel;
pub mod config;
pub mod error;
pub mod instance;
pub mod mapping;
pub mod openstack;
pub mod port;
pub mod reconciler;
pub mod source;
pub mod types;
pub mod volume;

pub use config::ReconcileOptions;
pub use error::{ApiError, ReconcileError, ResourceKind};
pub use instance::{InstancePlan, InstanceProvisioner};
pub use mapping::{NetworkMapping, NetworkMappings};
pub use openstack::ClientSet;
pub use port::{PortAction, PortReconciler, ReconciledPort};
pub use reconciler::{MigrationOutcome, MigrationReconciler};
pub use source::{DeviceInventory, SourceVm, VmSnapshot};
pub use volume::{NamingScheme, VolumeResolver};
