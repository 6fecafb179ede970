//! Persisted-state codec
//!
//! The host persists a [`ClusterInfo`] record verbatim between calls and the
//! driver keeps no memory of its own, so everything needed to resume work on a
//! cluster lives in the record's string metadata map under the keys below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::options::ClusterSpec;
use crate::Error;

/// Metadata key holding the JSON-encoded [`ClusterSpec`]
pub const STATE_KEY: &str = "state";
/// Metadata key holding the decimal LKE cluster id
pub const CLUSTER_ID_KEY: &str = "cluster-id";
/// Metadata key holding the cluster region
pub const REGION_KEY: &str = "region";
/// Metadata key caching the base64 kubeconfig after the first post-check
pub const KUBECONFIG_KEY: &str = "KubeConfig";

/// Cluster record exchanged with the host
#[derive(Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Kubernetes version
    #[serde(default)]
    pub version: String,
    /// Bearer token of the bootstrapped service account
    #[serde(default)]
    pub service_account_token: String,
    /// API server endpoint
    #[serde(default)]
    pub endpoint: String,
    /// Basic-auth username from the kubeconfig, if any
    #[serde(default)]
    pub username: String,
    /// Basic-auth password from the kubeconfig, if any
    #[serde(default)]
    pub password: String,
    /// Base64 cluster CA certificate
    #[serde(default)]
    pub root_ca_certificate: String,
    /// Base64 client certificate
    #[serde(default)]
    pub client_certificate: String,
    /// Base64 client key
    #[serde(default)]
    pub client_key: String,
    /// Total node count
    #[serde(default)]
    pub node_count: i64,
    /// Driver-private metadata, persisted verbatim by the host
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Host-side status string
    #[serde(default)]
    pub status: String,
}

impl std::fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("version", &self.version)
            .field("endpoint", &self.endpoint)
            .field("node_count", &self.node_count)
            .field("metadata_keys", &self.metadata.keys().collect::<Vec<_>>())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Node count exchanged with the host
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NodeCount {
    /// Total number of nodes
    pub count: i64,
}

/// Kubernetes version exchanged with the host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct KubernetesVersion {
    /// Version string, e.g. "1.31"
    pub version: String,
}

/// Durable state of one cluster, decoded from [`ClusterInfo::metadata`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistedState {
    /// Last successfully applied spec
    pub spec: ClusterSpec,
    /// LKE cluster id, once the remote create has returned
    pub cluster_id: Option<u64>,
    /// Cached base64 kubeconfig, once post-check has fetched it
    pub kubeconfig: Option<String>,
}

impl PersistedState {
    /// Fresh state for a cluster that does not exist remotely yet
    pub fn new(spec: ClusterSpec) -> Self {
        Self {
            spec,
            cluster_id: None,
            kubeconfig: None,
        }
    }

    /// Decode the state recorded in `info`
    pub fn load(info: &ClusterInfo) -> Result<Self, Error> {
        let raw = info
            .metadata
            .get(STATE_KEY)
            .ok_or_else(|| Error::serialization("cluster metadata has no recorded state"))?;
        let spec: ClusterSpec = serde_json::from_str(raw)
            .map_err(|e| Error::serialization(format!("failed to decode cluster state: {}", e)))?;

        let cluster_id = info
            .metadata
            .get(CLUSTER_ID_KEY)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>().map_err(|e| {
                    Error::serialization(format!("failed to parse cluster id {:?}: {}", s, e))
                })
            })
            .transpose()?;

        let kubeconfig = info
            .metadata
            .get(KUBECONFIG_KEY)
            .filter(|s| !s.is_empty())
            .cloned();

        Ok(Self {
            spec,
            cluster_id,
            kubeconfig,
        })
    }

    /// Encode this state into `info`, leaving foreign metadata keys alone
    pub fn store(&self, info: &mut ClusterInfo) -> Result<(), Error> {
        let raw = serde_json::to_string(&self.spec)
            .map_err(|e| Error::serialization(format!("failed to encode cluster state: {}", e)))?;
        info.metadata.insert(STATE_KEY.to_string(), raw);
        info.metadata
            .insert(REGION_KEY.to_string(), self.spec.region.clone());
        if let Some(id) = self.cluster_id {
            info.metadata
                .insert(CLUSTER_ID_KEY.to_string(), id.to_string());
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            info.metadata
                .insert(KUBECONFIG_KEY.to_string(), kubeconfig.clone());
        }
        Ok(())
    }

    /// The recorded cluster id, or an error naming the operation that needed it
    pub fn require_cluster_id(&self, operation: &str) -> Result<u64, Error> {
        self.cluster_id.ok_or_else(|| {
            Error::internal_with_context(operation, "no LKE cluster id recorded for this cluster")
        })
    }
}
