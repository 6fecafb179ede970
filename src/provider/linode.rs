//! reqwest implementation of [`LinodeApi`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::types::{
    ClusterCreateOptions, ClusterKubeconfig, ClusterUpdateOptions, LkeCluster, LkeVersion,
    NodePool, NodePoolCreateOptions, NodePoolUpdateOptions, Page,
};
use super::{LinodeApi, LinodeError};

/// Linode API base URL
pub const DEFAULT_LINODE_URL: &str = "https://api.linode.com";

/// User agent sent with every request
pub const USER_AGENT: &str = "kontainer-engine-driver-lke";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest page size the API accepts
const PAGE_SIZE: u32 = 500;

/// Authenticated client for the Linode v4 API
#[derive(Clone)]
pub struct LinodeClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for LinodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinodeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LinodeClient {
    /// Create a client for the given API base URL and personal access token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, LinodeError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, base_url, token))
    }

    /// Create a client with a custom HTTP client
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v4{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
    }

    async fn execute(&self, req: RequestBuilder) -> Result<reqwest::Response, LinodeError> {
        let response = req.send().await?;
        let status = response.status();
        trace!(status = %status, url = %response.url(), "linode api response");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LinodeError::from_response(status.as_u16(), &body))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, LinodeError> {
        let body = self.execute(req).await?.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| LinodeError::Decode(e.to_string()))
    }

    async fn send_empty(&self, req: RequestBuilder) -> Result<(), LinodeError> {
        self.execute(req).await?;
        Ok(())
    }

    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, LinodeError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let req = self
                .request(Method::GET, path)
                .query(&[("page", page), ("page_size", PAGE_SIZE)]);
            let result: Page<T> = self.send(req).await?;
            items.extend(result.data);
            if result.page >= result.pages {
                break;
            }
            page = result.page + 1;
        }
        debug!(path = %path, count = items.len(), "listed all pages");
        Ok(items)
    }
}

#[async_trait]
impl LinodeApi for LinodeClient {
    async fn create_cluster(
        &self,
        opts: &ClusterCreateOptions,
    ) -> Result<LkeCluster, LinodeError> {
        self.send(self.request(Method::POST, "/lke/clusters").json(opts))
            .await
    }

    async fn get_cluster(&self, cluster_id: u64) -> Result<LkeCluster, LinodeError> {
        self.send(self.request(Method::GET, &format!("/lke/clusters/{}", cluster_id)))
            .await
    }

    async fn update_cluster(
        &self,
        cluster_id: u64,
        opts: &ClusterUpdateOptions,
    ) -> Result<LkeCluster, LinodeError> {
        self.send(
            self.request(Method::PUT, &format!("/lke/clusters/{}", cluster_id))
                .json(opts),
        )
        .await
    }

    async fn delete_cluster(&self, cluster_id: u64) -> Result<(), LinodeError> {
        self.send_empty(self.request(Method::DELETE, &format!("/lke/clusters/{}", cluster_id)))
            .await
    }

    async fn list_node_pools(&self, cluster_id: u64) -> Result<Vec<NodePool>, LinodeError> {
        self.list_all(&format!("/lke/clusters/{}/pools", cluster_id))
            .await
    }

    async fn get_node_pool(&self, cluster_id: u64, pool_id: u64) -> Result<NodePool, LinodeError> {
        self.send(self.request(
            Method::GET,
            &format!("/lke/clusters/{}/pools/{}", cluster_id, pool_id),
        ))
        .await
    }

    async fn create_node_pool(
        &self,
        cluster_id: u64,
        opts: &NodePoolCreateOptions,
    ) -> Result<NodePool, LinodeError> {
        self.send(
            self.request(Method::POST, &format!("/lke/clusters/{}/pools", cluster_id))
                .json(opts),
        )
        .await
    }

    async fn update_node_pool(
        &self,
        cluster_id: u64,
        pool_id: u64,
        opts: &NodePoolUpdateOptions,
    ) -> Result<NodePool, LinodeError> {
        self.send(
            self.request(
                Method::PUT,
                &format!("/lke/clusters/{}/pools/{}", cluster_id, pool_id),
            )
            .json(opts),
        )
        .await
    }

    async fn delete_node_pool(&self, cluster_id: u64, pool_id: u64) -> Result<(), LinodeError> {
        self.send_empty(self.request(
            Method::DELETE,
            &format!("/lke/clusters/{}/pools/{}", cluster_id, pool_id),
        ))
        .await
    }

    async fn get_kubeconfig(&self, cluster_id: u64) -> Result<ClusterKubeconfig, LinodeError> {
        self.send(self.request(
            Method::GET,
            &format!("/lke/clusters/{}/kubeconfig", cluster_id),
        ))
        .await
    }

    async fn list_versions(&self) -> Result<Vec<LkeVersion>, LinodeError> {
        self.list_all("/lke/versions").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    const TOKEN: &str = "test-token";

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", TOKEN))
            .unwrap_or(false)
    }

    fn error_body(reason: &str) -> Json<serde_json::Value> {
        Json(serde_json::json!({"errors": [{"reason": reason}]}))
    }

    /// Three pages of one pool each
    async fn pools_page(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, error_body("Invalid Token"));
        }
        let page: u32 = params
            .get("page")
            .and_then(|p| p.parse().ok())
            .unwrap_or(1);
        let body = serde_json::json!({
            "data": [{"id": page, "type": "g6-standard-1", "count": 1, "nodes": []}],
            "page": page,
            "pages": 3,
            "results": 3,
        });
        (StatusCode::OK, Json(body))
    }

    async fn cluster(Path(id): Path<u64>) -> (StatusCode, Json<serde_json::Value>) {
        match id {
            404 => (StatusCode::NOT_FOUND, error_body("Not found")),
            503 => (StatusCode::SERVICE_UNAVAILABLE, error_body("Service unavailable")),
            _ => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "id": id,
                    "label": "prod",
                    "region": "us-east",
                    "k8s_version": "1.31",
                    "status": "ready",
                    "tags": [],
                })),
            ),
        }
    }

    async fn delete_cluster(Path(_id): Path<u64>) -> Json<serde_json::Value> {
        Json(serde_json::json!({}))
    }

    /// Serve canned v4 responses on an ephemeral port and return the base URL
    async fn fake_linode() -> String {
        let router = Router::new()
            .route("/v4/lke/clusters/{id}/pools", get(pools_page))
            .route("/v4/lke/clusters/{id}", get(cluster).delete(delete_cluster));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn pool_listing_merges_every_page_in_order() {
        let client = LinodeClient::new(fake_linode().await, TOKEN).unwrap();

        let pools = client.list_node_pools(1).await.unwrap();

        let ids: Vec<u64> = pools.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_as_a_hard_error() {
        let client = LinodeClient::new(fake_linode().await, "other-token").unwrap();

        let err = client.list_node_pools(1).await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Invalid Token"));
    }

    #[tokio::test]
    async fn error_bodies_map_to_status_classes() {
        let client = LinodeClient::new(fake_linode().await, TOKEN).unwrap();

        let missing = client.get_cluster(404).await.unwrap_err();
        assert!(missing.is_not_found());
        assert!(missing.to_string().contains("Not found"));

        let unavailable = client.get_cluster(503).await.unwrap_err();
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_not_found());

        let cluster = client.get_cluster(12).await.unwrap();
        assert_eq!(cluster.id, 12);
        assert_eq!(cluster.status, "ready");
    }

    #[tokio::test]
    async fn delete_with_empty_object_body_succeeds() {
        let client = LinodeClient::new(fake_linode().await, TOKEN).unwrap();

        client.delete_cluster(12).await.unwrap();
    }

    #[test]
    fn url_joins_base_and_version_prefix() {
        let client = LinodeClient::with_client(
            reqwest::Client::new(),
            "https://api.linode.com/",
            "token",
        );
        assert_eq!(
            client.url("/lke/clusters/12/pools"),
            "https://api.linode.com/v4/lke/clusters/12/pools"
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let client =
            LinodeClient::with_client(reqwest::Client::new(), DEFAULT_LINODE_URL, "s3cr3t");
        let rendered = format!("{:?}", client);
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("api.linode.com"));
    }
}
