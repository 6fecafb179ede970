//! Cluster lifecycle operations
//!
//! [`Driver`] is a stateless service: every operation receives the host's
//! [`ClusterInfo`] record, decodes the [`PersistedState`] from it, talks to
//! the Linode API and the provisioned cluster through the [`ClientFactory`],
//! and hands back an updated record. Nothing is remembered between calls.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kube::config::Kubeconfig;
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::node_pools::{list_node_pools, reconcile_node_pools, wait_until_pool_ready};
use crate::bootstrap::{
    generate_service_account_token, node_is_ready, KubeWorkloadCluster, WorkloadCluster,
};
use crate::config::{DriverConfig, PollSettings};
use crate::options::flags::{self, Capabilities, DriverFlags, K8sCapabilities};
use crate::options::{ClusterSpec, DriverOptions};
use crate::poll::poll_until;
use crate::provider::types::{
    ClusterCreateOptions, ClusterUpdateOptions, ControlPlane, NodePoolCreateOptions,
    NodePoolUpdateOptions, CLUSTER_STATUS_NOT_READY,
};
use crate::provider::{LinodeApi, LinodeClient};
use crate::state::{ClusterInfo, KubernetesVersion, NodeCount, PersistedState, CLUSTER_ID_KEY};
use crate::Error;

/// Builds the clients a driver operation needs
///
/// Clients are built per operation because the Linode token travels with the
/// cluster record rather than with the process.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Linode API client authenticated with `token`
    fn linode(&self, token: &str) -> Result<Arc<dyn LinodeApi>, Error>;

    /// Admin client for a provisioned cluster, from a decoded kubeconfig
    async fn workload(&self, kubeconfig: &[u8]) -> Result<Arc<dyn WorkloadCluster>, Error>;
}

/// Production [`ClientFactory`] backed by reqwest and kube-rs
#[derive(Clone, Debug)]
pub struct DefaultClientFactory {
    linode_url: String,
}

impl DefaultClientFactory {
    /// Factory for the given Linode API base URL
    pub fn new(linode_url: impl Into<String>) -> Self {
        Self {
            linode_url: linode_url.into(),
        }
    }
}

#[async_trait]
impl ClientFactory for DefaultClientFactory {
    fn linode(&self, token: &str) -> Result<Arc<dyn LinodeApi>, Error> {
        let client = LinodeClient::new(self.linode_url.clone(), token)
            .map_err(|e| Error::linode("building the Linode API client", e))?;
        Ok(Arc::new(client))
    }

    async fn workload(&self, kubeconfig: &[u8]) -> Result<Arc<dyn WorkloadCluster>, Error> {
        Ok(Arc::new(KubeWorkloadCluster::from_kubeconfig(kubeconfig).await?))
    }
}

/// The LKE cluster driver
pub struct Driver {
    clients: Arc<dyn ClientFactory>,
    poll: PollSettings,
}

impl Driver {
    /// Create a driver from its client factory and poll settings
    pub fn new(clients: Arc<dyn ClientFactory>, poll: PollSettings) -> Self {
        Self { clients, poll }
    }

    /// Create a production driver from process configuration
    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            Arc::new(DefaultClientFactory::new(config.linode_url.clone())),
            config.poll_settings(),
        )
    }

    /// Poll settings this driver waits with
    pub fn poll_settings(&self) -> &PollSettings {
        &self.poll
    }

    fn linode_for(&self, spec: &ClusterSpec) -> Result<Arc<dyn LinodeApi>, Error> {
        self.clients.linode(&spec.access_token)
    }

    /// Options accepted on create
    pub fn create_flags(&self) -> DriverFlags {
        flags::create_flags()
    }

    /// Options accepted on update
    pub fn update_flags(&self) -> DriverFlags {
        flags::update_flags()
    }

    /// Optional operations this driver implements
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Kubernetes features of provisioned clusters
    pub fn k8s_capabilities(&self, _options: &DriverOptions) -> K8sCapabilities {
        K8sCapabilities::default()
    }

    /// Create a cluster and wait until it has a ready node.
    ///
    /// Options are validated before any client is built.
    #[instrument(skip(self, options, cancel))]
    pub async fn create(
        &self,
        options: &DriverOptions,
        cancel: &CancellationToken,
    ) -> Result<ClusterInfo, Error> {
        let spec = ClusterSpec::from_options(options)?;
        debug!(spec = ?spec, "creating cluster");

        let mut info = ClusterInfo::default();
        let mut state = PersistedState::new(spec);
        state.store(&mut info)?;

        let api = self.linode_for(&state.spec)?;
        let request = create_request(&state.spec);
        let cluster = api.create_cluster(&request).await.map_err(|e| {
            Error::linode(format!("creating cluster {}", state.spec.label), e)
        })?;
        info!(cluster_id = cluster.id, label = %cluster.label, "cluster created");

        state.cluster_id = Some(cluster.id);
        state.store(&mut info)?;

        self.wait_for_ready_node(api.as_ref(), cluster.id, cancel)
            .await?;
        Ok(info)
    }

    /// Converge an existing cluster to new options.
    ///
    /// Returns the updated record; on error the caller's record stays as it
    /// was and a retry re-diffs against the live pools.
    #[instrument(skip_all, fields(cluster_id = %cluster_ref(info)))]
    pub async fn update(
        &self,
        info: &ClusterInfo,
        options: &DriverOptions,
        cancel: &CancellationToken,
    ) -> Result<ClusterInfo, Error> {
        let desired = ClusterSpec::from_options(options)?;
        let mut state = PersistedState::load(info)?;
        let cluster_id = state.require_cluster_id("update")?;

        if !desired.access_token.is_empty() {
            state.spec.access_token = desired.access_token.clone();
        }
        let api = self.linode_for(&state.spec)?;

        let plan = plan_cluster_update(&state.spec, &desired);
        if plan.is_empty() {
            debug!("cluster properties unchanged");
        } else {
            info!(
                label = plan.label.is_some(),
                tags = plan.tags.is_some(),
                high_availability = plan.control_plane.is_some(),
                "updating cluster properties"
            );
            api.update_cluster(cluster_id, &plan)
                .await
                .map_err(|e| Error::linode(format!("updating cluster {}", cluster_id), e))?;
            apply_cluster_update(&mut state.spec, &plan);
        }

        let observed = reconcile_node_pools(
            api.as_ref(),
            cluster_id,
            &desired.node_pools,
            &self.poll.pool_ready(),
            cancel,
        )
        .await?;
        state.spec.node_pools = observed;

        let mut updated = info.clone();
        state.store(&mut updated)?;
        Ok(updated)
    }

    /// Fill in connection details and bootstrap the service-account token.
    ///
    /// The kubeconfig is fetched once and cached in the record; the token
    /// bootstrap only runs while no token is cached.
    #[instrument(skip_all, fields(cluster_id = %cluster_ref(info)))]
    pub async fn post_check(
        &self,
        info: &ClusterInfo,
        cancel: &CancellationToken,
    ) -> Result<ClusterInfo, Error> {
        let mut state = PersistedState::load(info)?;

        let kubeconfig = match state.kubeconfig.clone() {
            Some(cached) => cached,
            None => {
                let cluster_id = state.require_cluster_id("post_check")?;
                let api = self.linode_for(&state.spec)?;
                self.wait_for_ready_node(api.as_ref(), cluster_id, cancel)
                    .await?;
                api.get_kubeconfig(cluster_id)
                    .await
                    .map_err(|e| {
                        Error::linode(format!("getting kubeconfig of cluster {}", cluster_id), e)
                    })?
                    .kubeconfig
            }
        };
        let raw = decode_kubeconfig(&kubeconfig)?;

        let mut updated = info.clone();
        apply_connection_details(&mut updated, &raw)?;
        updated.version = state.spec.kubernetes_version.clone();
        updated.node_count = i64::try_from(state.spec.node_count()).unwrap_or(i64::MAX);

        state.kubeconfig = Some(kubeconfig);
        state.store(&mut updated)?;

        if updated.service_account_token.is_empty() {
            let cluster = self.clients.workload(&raw).await?;
            updated.service_account_token =
                generate_service_account_token(cluster.as_ref(), &self.poll, cancel).await?;
        } else {
            debug!("service account token already cached");
        }

        Ok(updated)
    }

    /// Delete the cluster and wait for it to wind down
    #[instrument(skip_all, fields(cluster_id = %cluster_ref(info)))]
    pub async fn remove(&self, info: &ClusterInfo, cancel: &CancellationToken) -> Result<(), Error> {
        let state = PersistedState::load(info)?;
        let Some(cluster_id) = state.cluster_id else {
            warn!(name = %state.spec.name, "no cluster id recorded, nothing to remove");
            return Ok(());
        };
        debug!(name = %state.spec.name, region = %state.spec.region, "removing cluster");

        let api = self.linode_for(&state.spec)?;
        match api.delete_cluster(cluster_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!("cluster already deleted");
                return Ok(());
            }
            Err(e) => {
                return Err(Error::linode(format!("deleting cluster {}", cluster_id), e));
            }
        }

        let api = api.as_ref();
        poll_until(
            &self.poll.cluster_removal(),
            cancel,
            &format!("cluster {} to be removed", cluster_id),
            move || async move {
                match api.get_cluster(cluster_id).await {
                    Ok(cluster) => Ok(cluster.status == CLUSTER_STATUS_NOT_READY),
                    Err(e) if e.is_not_found() => Ok(true),
                    Err(e) => Err(Error::linode(format!("getting cluster {}", cluster_id), e)),
                }
            },
        )
        .await?;
        info!("cluster removed");
        Ok(())
    }

    /// Total requested node count over all remote pools
    #[instrument(skip_all, fields(cluster_id = %cluster_ref(info)))]
    pub async fn get_cluster_size(&self, info: &ClusterInfo) -> Result<NodeCount, Error> {
        let state = PersistedState::load(info)?;
        let cluster_id = state.require_cluster_id("get_cluster_size")?;
        let api = self.linode_for(&state.spec)?;

        let pools = list_node_pools(api.as_ref(), cluster_id).await?;
        let count = pools.iter().map(|p| i64::from(p.count)).sum();
        Ok(NodeCount { count })
    }

    /// Resize the first node pool to `count` nodes
    ///
    /// Waits for the pool to become ready only when it grows.
    #[instrument(skip_all, fields(cluster_id = %cluster_ref(info), count = count.count))]
    pub async fn set_cluster_size(
        &self,
        info: &ClusterInfo,
        count: &NodeCount,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if count.count <= 0 {
            return Err(Error::validation(format!(
                "at least 1 node required, got {}",
                count.count
            )));
        }
        let target = u32::try_from(count.count)
            .map_err(|_| Error::validation(format!("node count {} is too large", count.count)))?;

        let state = PersistedState::load(info)?;
        let cluster_id = state.require_cluster_id("set_cluster_size")?;
        let api = self.linode_for(&state.spec)?;

        let pools = list_node_pools(api.as_ref(), cluster_id).await?;
        let pool = pools.first().ok_or_else(|| {
            Error::internal_with_context(
                "set_cluster_size",
                format!("cluster {} has no node pools", cluster_id),
            )
        })?;

        info!(pool_id = pool.id, from = pool.count, to = target, "updating cluster size");
        api.update_node_pool(cluster_id, pool.id, &NodePoolUpdateOptions { count: target })
            .await
            .map_err(|e| {
                Error::linode(
                    format!("resizing node pool {} of cluster {}", pool.id, cluster_id),
                    e,
                )
            })?;

        if target > pool.count {
            wait_until_pool_ready(
                api.as_ref(),
                cluster_id,
                pool.id,
                &self.poll.pool_ready(),
                cancel,
            )
            .await?;
        }
        info!("cluster size updated");
        Ok(())
    }

    /// Kubernetes version reported by the API
    #[instrument(skip_all, fields(cluster_id = %cluster_ref(info)))]
    pub async fn get_version(&self, info: &ClusterInfo) -> Result<KubernetesVersion, Error> {
        let state = PersistedState::load(info)?;
        let cluster_id = state.require_cluster_id("get_version")?;
        let api = self.linode_for(&state.spec)?;

        let cluster = api
            .get_cluster(cluster_id)
            .await
            .map_err(|e| Error::linode(format!("getting cluster {}", cluster_id), e))?;
        Ok(KubernetesVersion {
            version: cluster.k8s_version,
        })
    }

    /// Accepted and ignored; upgrades are driven from the Linode side
    pub async fn set_version(
        &self,
        _info: &ClusterInfo,
        version: &KubernetesVersion,
    ) -> Result<(), Error> {
        debug!(version = %version.version, "ignoring version change request");
        Ok(())
    }

    /// Not supported
    pub async fn etcd_save(
        &self,
        _info: &ClusterInfo,
        _options: &DriverOptions,
        _snapshot_name: &str,
    ) -> Result<(), Error> {
        Err(Error::not_supported("ETCD snapshot save"))
    }

    /// Not supported
    pub async fn etcd_restore(
        &self,
        _info: &ClusterInfo,
        _options: &DriverOptions,
        _snapshot_name: &str,
    ) -> Result<ClusterInfo, Error> {
        Err(Error::not_supported("ETCD snapshot restore"))
    }

    /// Not supported
    pub async fn etcd_remove_snapshot(
        &self,
        _info: &ClusterInfo,
        _options: &DriverOptions,
        _snapshot_name: &str,
    ) -> Result<(), Error> {
        Err(Error::not_supported("ETCD snapshot removal"))
    }

    /// Nothing to clean up: this driver never created a legacy account
    pub async fn remove_legacy_service_account(&self, _info: &ClusterInfo) -> Result<(), Error> {
        Ok(())
    }

    async fn wait_for_ready_node(
        &self,
        api: &dyn LinodeApi,
        cluster_id: u64,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let clients = self.clients.as_ref();
        poll_until(
            &self.poll.cluster_ready(),
            cancel,
            &format!("cluster {} to have a ready node", cluster_id),
            move || async move { cluster_has_ready_node(clients, api, cluster_id).await },
        )
        .await
    }
}

/// One tick of the ready-node wait
///
/// The kubeconfig is unavailable and the API server unreachable for a while
/// after create, so those failures count as "not yet" unless they are
/// credential errors.
async fn cluster_has_ready_node(
    clients: &dyn ClientFactory,
    api: &dyn LinodeApi,
    cluster_id: u64,
) -> Result<bool, Error> {
    let kubeconfig = match api.get_kubeconfig(cluster_id).await {
        Ok(k) => k.kubeconfig,
        Err(e) if matches!(e.status(), Some(401) | Some(403)) => {
            return Err(Error::linode(
                format!("getting kubeconfig of cluster {}", cluster_id),
                e,
            ))
        }
        Err(e) if e.is_transient() => {
            return Err(Error::linode(
                format!("getting kubeconfig of cluster {}", cluster_id),
                e,
            ))
        }
        Err(e) => {
            debug!(error = %e, "kubeconfig not yet available");
            return Ok(false);
        }
    };

    let cluster = match decode_kubeconfig(&kubeconfig) {
        Ok(raw) => clients.workload(&raw).await,
        Err(e) => Err(e),
    };
    let cluster = match cluster {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "cluster not yet reachable");
            return Ok(false);
        }
    };

    match cluster.list_nodes().await {
        Ok(nodes) => {
            let ready = nodes.iter().filter(|n| node_is_ready(n)).count();
            debug!(nodes = nodes.len(), ready, "checked cluster nodes");
            Ok(ready > 0)
        }
        Err(e) if e.is_transient() => Err(e),
        Err(e) => {
            debug!(error = %e, "node list not yet available");
            Ok(false)
        }
    }
}

fn cluster_ref(info: &ClusterInfo) -> &str {
    info.metadata
        .get(CLUSTER_ID_KEY)
        .map(String::as_str)
        .unwrap_or("-")
}

fn create_request(spec: &ClusterSpec) -> ClusterCreateOptions {
    ClusterCreateOptions {
        label: spec.label.clone(),
        region: spec.region.clone(),
        k8s_version: spec.kubernetes_version.clone(),
        tags: spec.tags.clone(),
        node_pools: spec
            .node_pools
            .iter()
            .map(|(pool_type, &count)| NodePoolCreateOptions {
                pool_type: pool_type.clone(),
                count,
            })
            .collect(),
        control_plane: spec
            .high_availability
            .map(|high_availability| ControlPlane { high_availability }),
    }
}

/// Cluster-level changes between the recorded and the requested spec
///
/// - label: only a non-empty label that differs
/// - tags: when they differ as sets
/// - HA: only when a preference is given and it differs; absence never
///   downgrades
pub fn plan_cluster_update(current: &ClusterSpec, desired: &ClusterSpec) -> ClusterUpdateOptions {
    let mut plan = ClusterUpdateOptions::default();

    if !desired.label.is_empty() && desired.label != current.label {
        plan.label = Some(desired.label.clone());
    }
    if desired.tag_set() != current.tag_set() {
        plan.tags = Some(desired.tags.clone());
    }
    if let Some(high_availability) = desired.high_availability {
        if current.high_availability != Some(high_availability) {
            plan.control_plane = Some(ControlPlane { high_availability });
        }
    }

    plan
}

fn apply_cluster_update(spec: &mut ClusterSpec, plan: &ClusterUpdateOptions) {
    if let Some(label) = &plan.label {
        spec.label = label.clone();
    }
    if let Some(tags) = &plan.tags {
        spec.tags = tags.clone();
    }
    if let Some(control_plane) = plan.control_plane {
        spec.high_availability = Some(control_plane.high_availability);
    }
}

fn decode_kubeconfig(encoded: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::kubeconfig(format!("failed to decode kubeconfig: {}", e)))
}

/// Copy endpoint and credentials of the kubeconfig into the record
///
/// LKE kubeconfigs carry one cluster and one user; the first of each is used.
fn apply_connection_details(info: &mut ClusterInfo, raw: &[u8]) -> Result<(), Error> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::kubeconfig(format!("kubeconfig is not valid UTF-8: {}", e)))?;
    let kubeconfig = Kubeconfig::from_yaml(text)
        .map_err(|e| Error::kubeconfig(format!("failed to parse LKE cluster kubeconfig: {}", e)))?;

    let cluster = kubeconfig
        .clusters
        .first()
        .and_then(|c| c.cluster.as_ref())
        .ok_or_else(|| Error::kubeconfig("kubeconfig has no cluster"))?;
    info.endpoint = cluster
        .server
        .clone()
        .ok_or_else(|| Error::kubeconfig("kubeconfig cluster has no server"))?;
    if let Some(ca) = &cluster.certificate_authority_data {
        info.root_ca_certificate = ca.clone();
    }

    if let Some(user) = kubeconfig
        .auth_infos
        .first()
        .and_then(|a| a.auth_info.as_ref())
    {
        if let Some(username) = &user.username {
            info.username = username.clone();
        }
        if let Some(password) = &user.password {
            info.password = password.expose_secret().to_string();
        }
        if let Some(cert) = &user.client_certificate_data {
            info.client_certificate = cert.clone();
        }
        if let Some(key) = &user.client_key_data {
            info.client_key = key.expose_secret().to_string();
        }
    }
    Ok(())
}
