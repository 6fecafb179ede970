//! Wire types for the LKE section of the Linode v4 API

use serde::{Deserialize, Serialize};

/// Status reported for an LKE cluster
pub const CLUSTER_STATUS_NOT_READY: &str = "not_ready";

/// An LKE cluster as returned by `GET /lke/clusters/{id}`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct LkeCluster {
    /// Provider-assigned cluster id
    pub id: u64,
    /// Remote label
    #[serde(default)]
    pub label: String,
    /// Region the cluster runs in
    #[serde(default)]
    pub region: String,
    /// Kubernetes version, e.g. "1.31"
    #[serde(default)]
    pub k8s_version: String,
    /// Coarse cluster status ("ready", "not_ready")
    #[serde(default)]
    pub status: String,
    /// Tags attached to the cluster
    #[serde(default)]
    pub tags: Vec<String>,
    /// Control plane options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlane>,
}

/// Control plane options for an LKE cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ControlPlane {
    /// Replicated control plane
    pub high_availability: bool,
}

/// Body of `POST /lke/clusters`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ClusterCreateOptions {
    /// Remote label
    pub label: String,
    /// Region to create the cluster in
    pub region: String,
    /// Kubernetes version
    pub k8s_version: String,
    /// Cluster tags
    pub tags: Vec<String>,
    /// Initial node pools
    pub node_pools: Vec<NodePoolCreateOptions>,
    /// Control plane options, only sent when the caller expressed a preference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlane>,
}

/// Body of `PUT /lke/clusters/{id}`; absent fields are left unchanged remotely
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ClusterUpdateOptions {
    /// New label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Replacement tag list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// New control plane options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlane>,
}

impl ClusterUpdateOptions {
    /// True when no field would be changed
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.tags.is_none() && self.control_plane.is_none()
    }
}

/// Readiness of a node inside a pool
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Node has joined the cluster
    Ready,
    /// Node is provisioning or recycling
    NotReady,
    /// Any status this driver does not know about
    #[serde(other)]
    Unknown,
}

/// A member node of a pool
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PoolNode {
    /// Node id (e.g. "12345-6aa78910bc")
    pub id: String,
    /// Backing Linode instance id, absent while provisioning
    #[serde(default)]
    pub instance_id: Option<u64>,
    /// Readiness status
    pub status: NodeStatus,
}

/// A node pool as returned by the pools endpoints
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NodePool {
    /// Provider-assigned pool id
    pub id: u64,
    /// Linode type of every node in the pool, e.g. "g6-standard-1"
    #[serde(rename = "type")]
    pub pool_type: String,
    /// Requested node count
    pub count: u32,
    /// Current member nodes
    #[serde(default)]
    pub nodes: Vec<PoolNode>,
}

impl NodePool {
    /// True when every member node reports ready
    pub fn is_ready(&self) -> bool {
        self.nodes.iter().all(|n| n.status == NodeStatus::Ready)
    }
}

/// Body of `POST /lke/clusters/{id}/pools` and an entry of a cluster create
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NodePoolCreateOptions {
    /// Linode type for the pool's nodes
    #[serde(rename = "type")]
    pub pool_type: String,
    /// Node count
    pub count: u32,
}

/// Body of `PUT /lke/clusters/{id}/pools/{pool_id}`
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct NodePoolUpdateOptions {
    /// New node count
    pub count: u32,
}

/// Response of `GET /lke/clusters/{id}/kubeconfig`
#[derive(Clone, Deserialize)]
pub struct ClusterKubeconfig {
    /// Base64-encoded kubeconfig YAML
    pub kubeconfig: String,
}

impl std::fmt::Debug for ClusterKubeconfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterKubeconfig").finish_non_exhaustive()
    }
}

/// An available LKE Kubernetes version
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LkeVersion {
    /// Version id, e.g. "1.31"
    pub id: String,
}

/// One page of a paginated list endpoint
#[derive(Clone, Debug, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub data: Vec<T>,
    /// 1-based index of this page
    pub page: u32,
    /// Total number of pages
    pub pages: u32,
}

/// Error body returned by the API on non-2xx responses
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    /// Individual error reasons
    #[serde(default)]
    pub errors: Vec<ApiErrorReason>,
}

/// A single entry of [`ApiErrorBody`]
#[derive(Clone, Debug, Deserialize)]
pub struct ApiErrorReason {
    /// Human readable reason
    pub reason: String,
    /// Offending request field, if any
    #[serde(default)]
    pub field: Option<String>,
}

impl ApiErrorReason {
    /// Render as "field: reason" when a field is present
    pub fn render(&self) -> String {
        match &self.field {
            Some(field) => format!("{}: {}", field, self.reason),
            None => self.reason.clone(),
        }
    }
}
