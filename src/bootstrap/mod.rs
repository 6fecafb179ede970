//! Service-account credential bootstrap for provisioned clusters
//!
//! After a cluster first becomes reachable the host needs a long-lived bearer
//! token it can use instead of the provider's admin kubeconfig. The bootstrap
//! makes sure the following objects exist, tolerating `AlreadyExists` at every
//! step so a rerun against a half-bootstrapped cluster converges:
//!
//! 1. Namespace `cattle-system`
//! 2. ServiceAccount `cattle-system/kontainer-engine`
//! 3. ClusterRole `cluster-admin` (reused when present)
//! 4. ClusterRoleBinding `system-netes-default-clusterRoleBinding`
//! 5. Secret `cattle-system/kontainer-engine-secret` of the service-account
//!    token type
//!
//! It then waits for the token controller to populate `data.token` and returns
//! it. The whole sequence is retried on any error until its deadline.

mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PollSettings;
use crate::poll::{poll_for, PollPolicy};
use crate::Error;

pub use self::workload::{node_is_ready, KubeWorkloadCluster, WorkloadCluster};

#[cfg(test)]
pub use self::workload::MockWorkloadCluster;

/// Namespace holding the bootstrap service account
pub const CATTLE_NAMESPACE: &str = "cattle-system";
/// Name of the bootstrap service account
pub const SERVICE_ACCOUNT_NAME: &str = "kontainer-engine";
/// Cluster role granted to the service account
pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";
/// Name of the binding between the service account and the role
pub const CLUSTER_ROLE_BINDING_NAME: &str = "system-netes-default-clusterRoleBinding";
/// Name of the token secret
pub const SERVICE_ACCOUNT_SECRET_NAME: &str = "kontainer-engine-secret";

const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";
const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
const TOKEN_KEY: &str = "token";

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn cattle_namespace() -> Namespace {
    Namespace {
        metadata: metadata(CATTLE_NAMESPACE),
        ..Default::default()
    }
}

fn service_account() -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(SERVICE_ACCOUNT_NAME),
        ..Default::default()
    }
}

fn admin_role() -> ClusterRole {
    let all = || Some(vec!["*".to_string()]);
    ClusterRole {
        metadata: metadata(CLUSTER_ADMIN_ROLE),
        rules: Some(vec![
            PolicyRule {
                api_groups: all(),
                resources: all(),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                non_resource_urls: all(),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn role_binding(role_name: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: metadata(CLUSTER_ROLE_BINDING_NAME),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: SERVICE_ACCOUNT_NAME.to_string(),
            namespace: Some(CATTLE_NAMESPACE.to_string()),
            api_group: Some(String::new()),
        }]),
        role_ref: RoleRef {
            kind: "ClusterRole".to_string(),
            name: role_name.to_string(),
            api_group: "rbac.authorization.k8s.io".to_string(),
        },
    }
}

fn token_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(SERVICE_ACCOUNT_SECRET_NAME.to_string()),
            annotations: Some(BTreeMap::from([(
                SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
                SERVICE_ACCOUNT_NAME.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        ..Default::default()
    }
}

/// Treat `AlreadyExists` as success
fn tolerate_existing(result: Result<(), Error>, what: &str) -> Result<(), Error> {
    match result {
        Err(e) if e.is_already_exists() => {
            debug!(object = %what, "already exists");
            Ok(())
        }
        other => other,
    }
}

async fn ensure_cluster_role(cluster: &dyn WorkloadCluster) -> Result<String, Error> {
    if let Some(role) = cluster.get_cluster_role(CLUSTER_ADMIN_ROLE).await? {
        debug!("reusing existing cluster-admin role");
        return Ok(role.metadata.name.unwrap_or_else(|| CLUSTER_ADMIN_ROLE.to_string()));
    }
    match cluster.create_cluster_role(&admin_role()).await {
        Ok(role) => Ok(role.metadata.name.unwrap_or_else(|| CLUSTER_ADMIN_ROLE.to_string())),
        Err(e) if e.is_already_exists() => Ok(CLUSTER_ADMIN_ROLE.to_string()),
        Err(e) => Err(e),
    }
}

/// Create the service account objects once and wait for the token
async fn bootstrap_once(
    cluster: &dyn WorkloadCluster,
    secret_policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    tolerate_existing(
        cluster.create_namespace(&cattle_namespace()).await,
        "namespace",
    )?;
    tolerate_existing(
        cluster
            .create_service_account(CATTLE_NAMESPACE, &service_account())
            .await,
        "service account",
    )?;
    let role_name = ensure_cluster_role(cluster).await?;
    tolerate_existing(
        cluster
            .create_cluster_role_binding(&role_binding(&role_name))
            .await,
        "cluster role binding",
    )?;
    tolerate_existing(
        cluster
            .create_secret(CATTLE_NAMESPACE, &token_secret())
            .await,
        "token secret",
    )?;

    wait_for_token(cluster, secret_policy, cancel).await
}

async fn wait_for_token(
    cluster: &dyn WorkloadCluster,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    poll_for(policy, cancel, "service account token secret", move || async move {
        let secret = cluster
            .get_secret(CATTLE_NAMESPACE, SERVICE_ACCOUNT_SECRET_NAME)
            .await?;
        let token = secret
            .data
            .as_ref()
            .and_then(|data| data.get(TOKEN_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
            .filter(|token| !token.is_empty());
        if token.is_none() {
            debug!("token is not yet available");
        }
        Ok(token)
    })
    .await
}

/// Bootstrap the `kontainer-engine` service account and return its token.
///
/// A failed attempt is logged and the whole sequence retried until
/// [`PollSettings::service_account`] runs out; the final timeout carries the
/// last attempt's error. Cancellation is returned as is.
pub async fn generate_service_account_token(
    cluster: &dyn WorkloadCluster,
    settings: &PollSettings,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    let secret_policy = &settings.secret_token();

    let token = poll_for(
        &settings.service_account(),
        cancel,
        "service account bootstrap",
        move || async move {
            match bootstrap_once(cluster, secret_policy, cancel).await {
                Ok(token) => Ok(Some(token)),
                Err(e @ Error::Cancelled(_)) => Err(e),
                Err(e) => {
                    debug!(error = %e, "retrying on service account generation error");
                    Err(Error::attempt_failed(e))
                }
            }
        },
    )
    .await?;

    info!("service account token generated");
    Ok(token)
}
