//! Node identity resolution
//!
//! A unit of the satellite application has to discover which Kubernetes
//! node it was scheduled onto before it can register that node with the
//! cluster controller. The platform annotates each pod with the unit
//! identifier that owns it; the resolver lists the application's pods and
//! picks the one annotated with our own unit id.
//!
//! Resolution is lazy, once per reconciliation pass, and never cached:
//! the pod can be rescheduled onto a different host between passes. An
//! unresolvable identity is `Ok(None)` ("retry later"), never an error.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::debug;

/// Pod annotation carrying the platform-assigned unit identifier
pub const UNIT_ANNOTATION: &str = "juju.io/unit";

// =============================================================================
// Node Identity
// =============================================================================

/// The pairing of the logical cluster node name with the unit's current
/// network address. At most one pod maps to a given node name at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Host name of the node the unit's pod is scheduled on
    pub node_name: String,
    /// Current pod IP address
    pub address: String,
}

// =============================================================================
// Port Trait
// =============================================================================

/// Resolves the local unit to its cluster node.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` means the platform has not scheduled the local pod yet
    /// or its metadata is not yet populated; callers treat it as "retry
    /// on a later event", not as a failure.
    async fn resolve(&self) -> Result<Option<NodeIdentity>>;
}

// =============================================================================
// Pod Matching
// =============================================================================

/// Pick the pod annotated with this unit's identifier and extract its
/// node name and address. Pods without an assigned node or IP are not
/// yet resolvable.
pub fn match_unit_pod(pods: &[Pod], unit: &str) -> Option<NodeIdentity> {
    pods.iter().find_map(|pod| {
        let annotations = pod.metadata.annotations.as_ref()?;
        if annotations.get(UNIT_ANNOTATION).map(String::as_str) != Some(unit) {
            return None;
        }

        let node_name = pod.spec.as_ref()?.node_name.clone()?;
        let address = pod.status.as_ref()?.pod_ip.clone()?;

        Some(NodeIdentity { node_name, address })
    })
}

// =============================================================================
// Kubernetes Resolver
// =============================================================================

/// Resolver backed by the Kubernetes pod API
pub struct PodIdentityResolver {
    pods: Api<Pod>,
    app_name: String,
    unit: String,
}

impl PodIdentityResolver {
    pub fn new(client: Client, namespace: &str, app_name: &str, unit: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            app_name: app_name.to_string(),
            unit: unit.to_string(),
        }
    }
}

#[async_trait]
impl IdentityResolver for PodIdentityResolver {
    async fn resolve(&self) -> Result<Option<NodeIdentity>> {
        let params =
            ListParams::default().labels(&format!("app.kubernetes.io/name={}", self.app_name));
        let pods = self.pods.list(&params).await?;

        let identity = match_unit_pod(&pods.items, &self.unit);
        debug!(unit = %self.unit, ?identity, "Resolved local node identity");
        Ok(identity)
    }
}
