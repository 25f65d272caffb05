//! Error types for reconciliation
//!
//! `ApiError` covers anything that goes wrong talking to the target cloud.
//! `ReconcileError` is what every reconciliation operation returns; callers
//! match on it to decide whether to halt or continue a batch of migrations.

use std::time::Duration;
use thiserror::Error;

/// Target-cloud resource kinds, used to label lookup failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Volume,
    Port,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::Port => write!(f, "port"),
        }
    }
}

/// Failures reported by (or while talking to) the target cloud APIs
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("{service} API returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The response body could not be understood
    #[error("Failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// Authentication against the identity service failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The service catalog has no usable endpoint
    #[error("No endpoint found in service catalog for type '{service_type}'")]
    MissingEndpoint { service_type: String },
}

/// Errors returned by the reconciliation operations
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Nothing in the target cloud matches
    #[error("{resource} not found for {query}")]
    NotFound {
        resource: ResourceKind,
        query: String,
    },

    /// More than one target resource matches; never resolved automatically
    #[error("multiple {resource}s found for {query}: {}", .matches.join(", "))]
    Ambiguous {
        resource: ResourceKind,
        query: String,
        matches: Vec<String>,
    },

    /// A network mapping names a MAC address the VM does not have
    #[error("no NIC found for mapped MAC address: {mac}")]
    MappingNotFound { mac: String },

    /// Malformed network-mapping input
    #[error("invalid network mapping: {0}")]
    InvalidMapping(String),

    /// Upstream API failure, passed through unchanged
    #[error(transparent)]
    Upstream(#[from] ApiError),

    /// The source VM inventory could not be read
    #[error("failed to read source VM: {0:#}")]
    Source(anyhow::Error),

    /// The instance exists but did not become active in time
    #[error("instance {instance_id} did not become ACTIVE within {waited:?}")]
    Timeout {
        instance_id: String,
        waited: Duration,
    },

    /// The instance exists but the compute service put it in an error state
    #[error("instance {instance_id} entered status {status}")]
    InstanceFailed { instance_id: String, status: String },

    /// The instance exists but polling its status failed
    #[error("failed to poll instance {instance_id}: {source}")]
    WaitFailed {
        instance_id: String,
        #[source]
        source: ApiError,
    },

    /// The cancellation signal fired
    #[error("reconciliation cancelled{}", created_suffix(.instance_id))]
    Cancelled { instance_id: Option<String> },
}

impl ReconcileError {
    /// ID of the instance that was created before this error occurred.
    ///
    /// `Some` means the compute service accepted the creation request: the
    /// instance exists (or may still appear) and was not rolled back.
    pub fn created_instance(&self) -> Option<&str> {
        match self {
            ReconcileError::Timeout { instance_id, .. }
            | ReconcileError::InstanceFailed { instance_id, .. }
            | ReconcileError::WaitFailed { instance_id, .. } => Some(instance_id),
            ReconcileError::Cancelled { instance_id } => instance_id.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn not_found(resource: ResourceKind, query: impl Into<String>) -> Self {
        ReconcileError::NotFound {
            resource,
            query: query.into(),
        }
    }
}

fn created_suffix(instance_id: &Option<String>) -> String {
    match instance_id {
        Some(id) => format!(" after creating instance {}", id),
        None => String::new(),
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_instance_only_after_submission() {
        let timeout = ReconcileError::Timeout {
            instance_id: "srv-1".to_string(),
            waited: Duration::from_secs(300),
        };
        assert_eq!(timeout.created_instance(), Some("srv-1"));

        let cancelled = ReconcileError::Cancelled { instance_id: None };
        assert_eq!(cancelled.created_instance(), None);

        let not_found = ReconcileError::not_found(ResourceKind::Volume, "vm-1-2000");
        assert_eq!(not_found.created_instance(), None);
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = ReconcileError::Ambiguous {
            resource: ResourceKind::Port,
            query: "network net-1, mac aa:bb".to_string(),
            matches: vec!["p1".to_string(), "p2".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "multiple ports found for network net-1, mac aa:bb: p1, p2"
        );
    }

    #[test]
    fn test_cancelled_message() {
        let err = ReconcileError::Cancelled {
            instance_id: Some("srv-9".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "reconciliation cancelled after creating instance srv-9"
        );
    }
}
