//! Admin access to a provisioned cluster

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Trait abstracting the Kubernetes API of a provisioned cluster
///
/// Create operations surface `AlreadyExists` as an error so callers decide
/// whether a pre-existing object is acceptable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkloadCluster: Send + Sync {
    /// List every node of the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// Create a namespace
    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error>;

    /// Create a service account in `namespace`
    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), Error>;

    /// Fetch a cluster role, `None` when it does not exist
    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error>;

    /// Create a cluster role
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, Error>;

    /// Create a cluster role binding
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding)
        -> Result<(), Error>;

    /// Create a secret in `namespace`
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Fetch a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;
}

/// kube-rs implementation of [`WorkloadCluster`]
pub struct KubeWorkloadCluster {
    client: Client,
}

impl KubeWorkloadCluster {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using a decoded kubeconfig document
    pub async fn from_kubeconfig(kubeconfig: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| Error::kubeconfig(format!("kubeconfig is not valid UTF-8: {}", e)))?;
        let parsed = Kubeconfig::from_yaml(text)
            .map_err(|e| Error::kubeconfig(format!("failed to parse kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::kubeconfig(format!("failed to load kubeconfig: {}", e)))?;
        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl WorkloadCluster for KubeWorkloadCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace).await?;
        Ok(())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<(), Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), account).await?;
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), role).await?)
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&PostParams::default(), binding).await?;
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

/// Whether the node reports the `Ready=True` condition
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}
