//! Cluster controller API client
//!
//! The [`ClusterApi`] trait is the seam between the reconciler and the
//! controller's management API; [`RestClusterApi`] is the production
//! implementation over reqwest.
//!
//! Connections are scoped per call, never held across reconciliation
//! passes: the endpoint arrives over relation data and can change between
//! events. Every call either succeeds, fails with
//! [`Error::ClusterUnreachable`] (the controller process is not
//! answering), or fails with [`Error::ClusterApi`] (the controller
//! answered but an embedded response code signals failure).

use crate::cluster::types::{
    ApiCallRc, CreateDevicePool, CreateStoragePool, NodeRegistration, StoragePool,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Port Trait
// =============================================================================

/// Operations the reconciler invokes against the cluster controller.
///
/// May only be called once an endpoint is known. All create/delete
/// operations are name-keyed and idempotence is achieved by the caller
/// listing before creating, not by the controller.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List registered nodes, optionally filtered to a single node name
    async fn list_nodes(&self, filter_by_name: Option<&str>) -> Result<Vec<NodeRegistration>>;

    /// Register a node with the cluster
    async fn create_node(&self, registration: &NodeRegistration) -> Result<()>;

    /// Remove a node's registration
    async fn delete_node(&self, name: &str) -> Result<()>;

    /// List the storage pools currently present on a node
    async fn list_storage_pools(&self, node: &str) -> Result<Vec<StoragePool>>;

    /// Create a storage pool on top of an existing provider-side pool
    async fn create_storage_pool(&self, node: &str, request: &CreateStoragePool) -> Result<()>;

    /// Create a provider pool from raw devices plus the storage pool on it
    async fn create_storage_pool_from_devices(
        &self,
        node: &str,
        request: &CreateDevicePool,
    ) -> Result<()>;
}

// =============================================================================
// Client Factory
// =============================================================================

/// Builds a [`ClusterApi`] for whatever endpoint the current pass stored.
///
/// A client is never reused across passes; relation data can move the
/// controller between two deliveries.
pub trait ClusterApiFactory: Send + Sync {
    fn connect(&self, endpoint: &str) -> Arc<dyn ClusterApi>;
}

/// Factory producing [`RestClusterApi`] clients
pub struct RestClusterFactory {
    timeout: Duration,
}

impl RestClusterFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RestClusterFactory {
    fn default() -> Self {
        Self::new(RestClusterApi::DEFAULT_TIMEOUT)
    }
}

impl ClusterApiFactory for RestClusterFactory {
    fn connect(&self, endpoint: &str) -> Arc<dyn ClusterApi> {
        Arc::new(RestClusterApi::new(endpoint).with_timeout(self.timeout))
    }
}

// =============================================================================
// Response Code Inspection
// =============================================================================

/// Fail if any embedded response code signals an application-level error.
///
/// The controller returns a list of per-operation codes even on HTTP 200;
/// transport status alone is not sufficient.
pub fn check_api_rcs(operation: &str, rcs: &[ApiCallRc]) -> Result<()> {
    match rcs.iter().find(|rc| rc.is_error()) {
        Some(rc) => Err(Error::ClusterApi {
            operation: operation.to_string(),
            ret_code: rc.ret_code,
            message: rc.message.clone(),
        }),
        None => Ok(()),
    }
}

// =============================================================================
// Scoped HTTP Handle
// =============================================================================

/// A connection handle to the controller, opened per call and released
/// when dropped at the end of the operation.
struct ClusterHandle {
    http: reqwest::Client,
    base: String,
}

impl ClusterHandle {
    fn open(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| Error::ClusterUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error_from_response(operation, status, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("{operation}: invalid response body: {e}")))
    }

    /// POST/DELETE carrying back a list of per-operation response codes
    async fn mutate(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::ClusterUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error_from_response(operation, status, response).await);
        }

        let rcs: Vec<ApiCallRc> = response.json().await.unwrap_or_default();
        check_api_rcs(operation, &rcs)
    }
}

/// Build a `ClusterApi` error from a non-2xx transport response, carrying
/// the embedded response codes when the body has them.
async fn api_error_from_response(
    operation: &str,
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> Error {
    let rcs: Vec<ApiCallRc> = response.json().await.unwrap_or_default();
    match rcs.into_iter().find(|rc| rc.is_error()) {
        Some(rc) => Error::ClusterApi {
            operation: operation.to_string(),
            ret_code: rc.ret_code,
            message: rc.message,
        },
        None => Error::ClusterApi {
            operation: operation.to_string(),
            ret_code: -(status.as_u16() as i64),
            message: format!("controller returned HTTP {status}"),
        },
    }
}

// =============================================================================
// REST Implementation
// =============================================================================

/// Production client for the controller's REST management API
pub struct RestClusterApi {
    endpoint: String,
    timeout: Duration,
}

impl RestClusterApi {
    /// Default per-call timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn handle(&self) -> Result<ClusterHandle> {
        ClusterHandle::open(&self.endpoint, self.timeout)
    }
}

#[async_trait]
impl ClusterApi for RestClusterApi {
    async fn list_nodes(&self, filter_by_name: Option<&str>) -> Result<Vec<NodeRegistration>> {
        let handle = self.handle()?;
        let path = match filter_by_name {
            Some(name) => format!("/v1/nodes?nodes={}", urlencoding::encode(name)),
            None => "/v1/nodes".to_string(),
        };
        debug!(endpoint = %self.endpoint, ?filter_by_name, "Listing cluster nodes");
        handle.get_json("list_nodes", &path).await
    }

    async fn create_node(&self, registration: &NodeRegistration) -> Result<()> {
        let handle = self.handle()?;
        debug!(node = %registration.name, "Registering node with cluster");
        let request = handle
            .http
            .post(handle.url("/v1/nodes"))
            .json(registration);
        handle.mutate("create_node", request).await
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        let handle = self.handle()?;
        debug!(node = %name, "Deleting node registration");
        let request = handle
            .http
            .delete(handle.url(&format!("/v1/nodes/{}", urlencoding::encode(name))));
        handle.mutate("delete_node", request).await
    }

    async fn list_storage_pools(&self, node: &str) -> Result<Vec<StoragePool>> {
        let handle = self.handle()?;
        let path = format!("/v1/nodes/{}/storage-pools", urlencoding::encode(node));
        debug!(node = %node, "Listing storage pools");
        handle.get_json("list_storage_pools", &path).await
    }

    async fn create_storage_pool(&self, node: &str, request: &CreateStoragePool) -> Result<()> {
        let handle = self.handle()?;
        debug!(node = %node, pool = %request.storage_pool_name, "Creating storage pool");
        let request = handle
            .http
            .post(handle.url(&format!(
                "/v1/nodes/{}/storage-pools",
                urlencoding::encode(node)
            )))
            .json(request);
        handle.mutate("create_storage_pool", request).await
    }

    async fn create_storage_pool_from_devices(
        &self,
        node: &str,
        request: &CreateDevicePool,
    ) -> Result<()> {
        let handle = self.handle()?;
        debug!(
            node = %node,
            pool = %request.with_storage_pool.name,
            devices = ?request.device_paths,
            "Creating storage pool from devices"
        );
        let request = handle
            .http
            .post(handle.url(&format!(
                "/v1/physical-storage/{}",
                urlencoding::encode(node)
            )))
            .json(request);
        handle
            .mutate("create_storage_pool_from_devices", request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn rc(ret_code: i64, message: &str) -> ApiCallRc {
        ApiCallRc {
            ret_code,
            message: message.into(),
            cause: None,
        }
    }

    #[test]
    fn test_check_api_rcs_all_success() {
        let rcs = vec![rc(1, "Node created"), rc(2, "Netif registered")];
        assert!(check_api_rcs("create_node", &rcs).is_ok());
    }

    #[test]
    fn test_check_api_rcs_empty() {
        assert!(check_api_rcs("delete_node", &[]).is_ok());
    }

    #[test]
    fn test_check_api_rcs_embedded_failure() {
        // Transport-level success can still carry a failed operation.
        let rcs = vec![rc(1, "Pool resolved"), rc(-3, "Invalid provider")];
        let err = check_api_rcs("create_storage_pool", &rcs).unwrap_err();
        assert_matches!(
            err,
            Error::ClusterApi { ret_code: -3, ref operation, .. } if operation == "create_storage_pool"
        );
    }

    #[test]
    fn test_rest_client_endpoint_normalized() {
        let api = RestClusterApi::new("http://controller:3370/");
        let handle = api.handle().unwrap();
        assert_eq!(handle.url("/v1/nodes"), "http://controller:3370/v1/nodes");
    }
}
