//! Configuration
//!
//! `ReconcileOptions` carries every knob the reconcilers honour as an
//! explicit value. `OpenStackArgs` holds the cloud credentials; each field
//! falls back to the conventional `OS_*` environment variable.

use clap::Args;
use std::time::Duration;

/// How long to wait for a new instance to become active
pub const DEFAULT_ACTIVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval between instance status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options threaded through a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Match volumes by name only, ignoring ownership metadata
    pub unsafe_volume_by_name: bool,
    /// Security groups attached to ports created on a managed subnet
    pub security_groups: Vec<String>,
    pub active_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            unsafe_volume_by_name: false,
            security_groups: Vec::new(),
            active_timeout: DEFAULT_ACTIVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReconcileOptions {
    pub fn unsafe_volume_by_name(mut self, enabled: bool) -> Self {
        self.unsafe_volume_by_name = enabled;
        self
    }

    pub fn security_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security_groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn active_timeout(mut self, timeout: Duration) -> Self {
        self.active_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// OpenStack credentials and endpoint selection
#[derive(Args, Debug, Clone)]
pub struct OpenStackArgs {
    /// Identity service URL (e.g., https://keystone.example.com:5000/v3)
    #[arg(long, env = "OS_AUTH_URL")]
    pub auth_url: String,

    #[arg(long, env = "OS_USERNAME")]
    pub username: String,

    #[arg(long, env = "OS_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "OS_PROJECT_NAME")]
    pub project_name: Option<String>,

    #[arg(long, env = "OS_PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "OS_USER_DOMAIN_NAME", default_value = "Default")]
    pub user_domain_name: String,

    #[arg(long, env = "OS_PROJECT_DOMAIN_NAME", default_value = "Default")]
    pub project_domain_name: String,

    #[arg(long, env = "OS_REGION_NAME")]
    pub region_name: Option<String>,

    /// Endpoint interface to use from the service catalog
    #[arg(long, env = "OS_INTERFACE", default_value = "public")]
    pub interface: String,

    /// Skip TLS certificate verification
    #[arg(long, env = "OS_INSECURE")]
    pub insecure: bool,
}
