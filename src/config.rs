//! Process configuration

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use crate::poll::PollPolicy;
use crate::provider::DEFAULT_LINODE_URL;

/// Default interval between readiness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default deadline for a new cluster to report a ready node
pub const DEFAULT_CLUSTER_READY_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Default deadline for a deleted cluster to wind down
pub const DEFAULT_CLUSTER_REMOVAL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default deadline for the whole service-account bootstrap
pub const DEFAULT_SERVICE_ACCOUNT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Interval between checks of the service-account token secret
pub const SECRET_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Deadline for the token controller to populate the secret
pub const SECRET_POLL_TIMEOUT: Duration = Duration::from_secs(15);

/// LKE cluster driver - exposes the driver operations over HTTP to its host
#[derive(Parser, Debug, Clone)]
#[command(name = "lke-driver", version, about, long_about = None)]
pub struct DriverConfig {
    /// Port to listen on, chosen by the host
    pub port: u16,

    /// Address to bind the listener to
    #[arg(long, env = "LKE_DRIVER_BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: IpAddr,

    /// Linode API base URL
    #[arg(long, env = "LINODE_URL", default_value = DEFAULT_LINODE_URL)]
    pub linode_url: String,

    /// Seconds between readiness checks
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Seconds to wait for a new cluster to report a ready node
    #[arg(long, default_value_t = 1200)]
    pub cluster_ready_timeout_secs: u64,

    /// Seconds to wait for a deleted cluster to wind down
    #[arg(long, default_value_t = 600)]
    pub cluster_removal_timeout_secs: u64,

    /// Seconds to keep retrying the service-account bootstrap
    #[arg(long, default_value_t = 300)]
    pub service_account_timeout_secs: u64,
}

impl DriverConfig {
    /// Poll intervals and deadlines derived from the flags
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            cluster_ready_timeout: Duration::from_secs(self.cluster_ready_timeout_secs),
            cluster_removal_timeout: Duration::from_secs(self.cluster_removal_timeout_secs),
            service_account_timeout: Duration::from_secs(self.service_account_timeout_secs),
            ..PollSettings::default()
        }
    }
}

/// Every interval and deadline the driver waits with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    /// Interval of cluster, pool and service-account polls
    pub interval: Duration,
    /// Deadline for a ready node after create and before the first post-check
    pub cluster_ready_timeout: Duration,
    /// Deadline for the cluster to wind down after delete
    pub cluster_removal_timeout: Duration,
    /// Deadline for the service-account bootstrap retries
    pub service_account_timeout: Duration,
    /// Interval of the token secret poll
    pub secret_interval: Duration,
    /// Deadline of the token secret poll
    pub secret_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            cluster_ready_timeout: DEFAULT_CLUSTER_READY_TIMEOUT,
            cluster_removal_timeout: DEFAULT_CLUSTER_REMOVAL_TIMEOUT,
            service_account_timeout: DEFAULT_SERVICE_ACCOUNT_TIMEOUT,
            secret_interval: SECRET_POLL_INTERVAL,
            secret_timeout: SECRET_POLL_TIMEOUT,
        }
    }
}

impl PollSettings {
    /// Wait for a ready node
    pub fn cluster_ready(&self) -> PollPolicy {
        PollPolicy::bounded(self.interval, self.cluster_ready_timeout)
    }

    /// Wait for a deleted cluster to wind down
    pub fn cluster_removal(&self) -> PollPolicy {
        PollPolicy::bounded(self.interval, self.cluster_removal_timeout)
    }

    /// Wait for every node of a pool; no deadline
    pub fn pool_ready(&self) -> PollPolicy {
        PollPolicy::unbounded(self.interval)
    }

    /// Retry the whole service-account bootstrap
    pub fn service_account(&self) -> PollPolicy {
        PollPolicy::bounded(self.interval, self.service_account_timeout)
    }

    /// Wait for the token controller to fill the secret
    pub fn secret_token(&self) -> PollPolicy {
        PollPolicy::bounded(self.secret_interval, self.secret_timeout)
    }
}
