//! HTTP/JSON adapter exposing the driver to its host
//!
//! Every lifecycle operation is a `POST /v1/<operation>` taking a JSON body
//! and answering with JSON. Failures come back as `{"error": message}` with a
//! status derived from the [`Error`] variant.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::controller::Driver;
use crate::options::flags::{Capabilities, DriverFlags, K8sCapabilities};
use crate::options::DriverOptions;
use crate::state::{ClusterInfo, KubernetesVersion, NodeCount};
use crate::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Linode { .. } | Error::Kube(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "driver operation failed");
        }

        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Body of `create` and `k8s-capabilities`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OptionsRequest {
    /// Host options
    #[serde(default)]
    pub options: DriverOptions,
}

/// Body of operations that act on an existing cluster record
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct InfoRequest {
    /// Host-persisted cluster record
    #[serde(default)]
    pub info: ClusterInfo,
}

/// Body of `update`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateRequest {
    /// Host-persisted cluster record
    #[serde(default)]
    pub info: ClusterInfo,
    /// New host options
    #[serde(default)]
    pub options: DriverOptions,
}

/// Body of `set-cluster-size`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SetSizeRequest {
    /// Host-persisted cluster record
    #[serde(default)]
    pub info: ClusterInfo,
    /// Requested node count
    pub count: NodeCount,
}

/// Body of `set-version`
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SetVersionRequest {
    /// Host-persisted cluster record
    #[serde(default)]
    pub info: ClusterInfo,
    /// Requested version
    pub version: KubernetesVersion,
}

/// Body of the etcd snapshot operations
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    /// Host-persisted cluster record
    #[serde(default)]
    pub info: ClusterInfo,
    /// Host options
    #[serde(default)]
    pub options: DriverOptions,
    /// Snapshot name
    #[serde(default)]
    pub snapshot_name: String,
}

#[derive(Clone)]
struct AppState {
    driver: Arc<Driver>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Token for one request; cancelled on shutdown
    fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<OptionsRequest>,
) -> Result<Json<ClusterInfo>, Error> {
    let cancel = state.request_token();
    Ok(Json(state.driver.create(&req.options, &cancel).await?))
}

async fn update(
    State(state): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ClusterInfo>, Error> {
    let cancel = state.request_token();
    Ok(Json(state.driver.update(&req.info, &req.options, &cancel).await?))
}

async fn post_check(
    State(state): State<AppState>,
    Json(req): Json<InfoRequest>,
) -> Result<Json<ClusterInfo>, Error> {
    let cancel = state.request_token();
    Ok(Json(state.driver.post_check(&req.info, &cancel).await?))
}

async fn remove(
    State(state): State<AppState>,
    Json(req): Json<InfoRequest>,
) -> Result<StatusCode, Error> {
    let cancel = state.request_token();
    state.driver.remove(&req.info, &cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_cluster_size(
    State(state): State<AppState>,
    Json(req): Json<InfoRequest>,
) -> Result<Json<NodeCount>, Error> {
    Ok(Json(state.driver.get_cluster_size(&req.info).await?))
}

async fn set_cluster_size(
    State(state): State<AppState>,
    Json(req): Json<SetSizeRequest>,
) -> Result<StatusCode, Error> {
    let cancel = state.request_token();
    state
        .driver
        .set_cluster_size(&req.info, &req.count, &cancel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_version(
    State(state): State<AppState>,
    Json(req): Json<InfoRequest>,
) -> Result<Json<KubernetesVersion>, Error> {
    Ok(Json(state.driver.get_version(&req.info).await?))
}

async fn set_version(
    State(state): State<AppState>,
    Json(req): Json<SetVersionRequest>,
) -> Result<StatusCode, Error> {
    state.driver.set_version(&req.info, &req.version).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn etcd_save(
    State(state): State<AppState>,
    Json(req): Json<SnapshotRequest>,
) -> Result<StatusCode, Error> {
    state
        .driver
        .etcd_save(&req.info, &req.options, &req.snapshot_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn etcd_restore(
    State(state): State<AppState>,
    Json(req): Json<SnapshotRequest>,
) -> Result<Json<ClusterInfo>, Error> {
    Ok(Json(
        state
            .driver
            .etcd_restore(&req.info, &req.options, &req.snapshot_name)
            .await?,
    ))
}

async fn etcd_remove_snapshot(
    State(state): State<AppState>,
    Json(req): Json<SnapshotRequest>,
) -> Result<StatusCode, Error> {
    state
        .driver
        .etcd_remove_snapshot(&req.info, &req.options, &req.snapshot_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_legacy_service_account(
    State(state): State<AppState>,
    Json(req): Json<InfoRequest>,
) -> Result<StatusCode, Error> {
    state
        .driver
        .remove_legacy_service_account(&req.info)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_options(State(state): State<AppState>) -> Json<DriverFlags> {
    Json(state.driver.create_flags())
}

async fn update_options(State(state): State<AppState>) -> Json<DriverFlags> {
    Json(state.driver.update_flags())
}

async fn capabilities(State(state): State<AppState>) -> Json<Capabilities> {
    Json(state.driver.capabilities())
}

async fn k8s_capabilities(
    State(state): State<AppState>,
    Json(req): Json<OptionsRequest>,
) -> Json<K8sCapabilities> {
    Json(state.driver.k8s_capabilities(&req.options))
}

/// Router exposing every driver operation
///
/// Long-running requests observe a child of `shutdown`, so cancelling it
/// abandons in-flight waits.
pub fn router(driver: Arc<Driver>, shutdown: CancellationToken) -> axum::Router {
    let state = AppState { driver, shutdown };

    axum::Router::new()
        .route("/v1/create", post(create))
        .route("/v1/update", post(update))
        .route("/v1/post-check", post(post_check))
        .route("/v1/remove", post(remove))
        .route("/v1/get-cluster-size", post(get_cluster_size))
        .route("/v1/set-cluster-size", post(set_cluster_size))
        .route("/v1/get-version", post(get_version))
        .route("/v1/set-version", post(set_version))
        .route("/v1/etcd-save", post(etcd_save))
        .route("/v1/etcd-restore", post(etcd_restore))
        .route("/v1/etcd-remove-snapshot", post(etcd_remove_snapshot))
        .route(
            "/v1/remove-legacy-service-account",
            post(remove_legacy_service_account),
        )
        .route("/v1/create-options", get(create_options))
        .route("/v1/update-options", get(update_options))
        .route("/v1/capabilities", get(capabilities))
        .route("/v1/k8s-capabilities", post(k8s_capabilities))
        .with_state(state)
}
