//! Cluster and node-pool reconciliation
//!
//! [`Driver`] owns the lifecycle entry points; [`node_pools`] converges the
//! pools of one cluster and is shared by update and resize.

mod cluster;
pub mod node_pools;

pub use cluster::{plan_cluster_update, ClientFactory, DefaultClientFactory, Driver};

#[cfg(test)]
pub use cluster::MockClientFactory;
