//! Remote control-plane client for Linode Kubernetes Engine
//!
//! [`LinodeApi`] is the narrow set of LKE operations the reconcilers need.
//! [`LinodeClient`] implements it over the Linode v4 REST API; tests use the
//! generated `MockLinodeApi`.

mod error;
mod linode;
pub mod types;

pub use error::LinodeError;
pub use linode::{LinodeClient, DEFAULT_LINODE_URL, USER_AGENT};

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use types::{
    ClusterCreateOptions, ClusterKubeconfig, ClusterUpdateOptions, LkeCluster, LkeVersion,
    NodePool, NodePoolCreateOptions, NodePoolUpdateOptions,
};

/// Trait abstracting the LKE API
///
/// All ids are provider-assigned. Implementations must not cache results:
/// every call reflects the remote state at the time of the call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LinodeApi: Send + Sync {
    /// Create a cluster with its initial node pools
    async fn create_cluster(&self, opts: &ClusterCreateOptions)
        -> Result<LkeCluster, LinodeError>;

    /// Fetch a cluster
    async fn get_cluster(&self, cluster_id: u64) -> Result<LkeCluster, LinodeError>;

    /// Update cluster-level properties
    async fn update_cluster(
        &self,
        cluster_id: u64,
        opts: &ClusterUpdateOptions,
    ) -> Result<LkeCluster, LinodeError>;

    /// Delete a cluster and all of its pools
    async fn delete_cluster(&self, cluster_id: u64) -> Result<(), LinodeError>;

    /// List every node pool of a cluster
    async fn list_node_pools(&self, cluster_id: u64) -> Result<Vec<NodePool>, LinodeError>;

    /// Fetch one node pool including member node statuses
    async fn get_node_pool(&self, cluster_id: u64, pool_id: u64)
        -> Result<NodePool, LinodeError>;

    /// Add a node pool to a cluster
    async fn create_node_pool(
        &self,
        cluster_id: u64,
        opts: &NodePoolCreateOptions,
    ) -> Result<NodePool, LinodeError>;

    /// Resize a node pool
    async fn update_node_pool(
        &self,
        cluster_id: u64,
        pool_id: u64,
        opts: &NodePoolUpdateOptions,
    ) -> Result<NodePool, LinodeError>;

    /// Delete a node pool
    async fn delete_node_pool(&self, cluster_id: u64, pool_id: u64) -> Result<(), LinodeError>;

    /// Fetch the cluster's admin kubeconfig (base64)
    async fn get_kubeconfig(&self, cluster_id: u64) -> Result<ClusterKubeconfig, LinodeError>;

    /// List the Kubernetes versions LKE currently offers
    async fn list_versions(&self) -> Result<Vec<LkeVersion>, LinodeError>;
}
