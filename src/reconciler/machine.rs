//! The per-unit reconciliation machine
//!
//! Every delivery starts from scratch: re-read the persisted endpoint,
//! re-resolve the local node identity, re-list the cluster's view, then
//! issue the minimal corrective operations (list-then-create, never blind
//! create). Transient conditions (unreachable controller, unscheduled
//! pod, offline satellite) produce an [`Outcome::Deferred`] so the
//! surrounding loop redelivers the same event later; application-level
//! failures propagate as hard errors for the pass.

use crate::cluster::{
    provider_kind, ClusterApi, ClusterApiFactory, CreateDevicePool, CreateStoragePool,
    NodeRegistration, WithStoragePool, PROP_STORAGE_POOL_NAME,
};
use crate::config::{parse_storage_pool_config, StoragePoolSpec};
use crate::error::{Error, Result};
use crate::node::{IdentityResolver, NodeIdentity};
use crate::reconciler::{DeferReason, Event, Outcome, UnitStatus};
use crate::state::StateStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State-store key holding the controller endpoint received over relation
/// data. The only mutable state persisted across events.
pub const ENDPOINT_KEY: &str = "controller-endpoint";

// =============================================================================
// Reconciler
// =============================================================================

/// The storage-node reconciler for one unit
pub struct Reconciler {
    clusters: Arc<dyn ClusterApiFactory>,
    resolver: Arc<dyn IdentityResolver>,
    store: Arc<dyn StateStore>,
    /// Application name recorded on node registrations we own
    app_name: String,
}

impl Reconciler {
    pub fn new(
        clusters: Arc<dyn ClusterApiFactory>,
        resolver: Arc<dyn IdentityResolver>,
        store: Arc<dyn StateStore>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            clusters,
            resolver,
            store,
            app_name: app_name.into(),
        }
    }

    /// Handle one event to completion or to a deferral point
    pub async fn handle(&self, event: &Event) -> Result<Outcome> {
        match event {
            Event::EndpointChanged { url, pool_config } => {
                self.on_endpoint_changed(url.as_deref(), pool_config).await
            }
            Event::ConfigChanged { pool_config } => self.on_config_changed(pool_config).await,
            Event::RelationBroken => self.on_relation_broken().await,
        }
    }

    // =========================================================================
    // Endpoint Acquired
    // =========================================================================

    async fn on_endpoint_changed(
        &self,
        url: Option<&str>,
        pool_config: &str,
    ) -> Result<Outcome> {
        // Validating parse at handler entry; a malformed pool config is
        // fatal for the whole pass.
        let desired = parse_storage_pool_config(pool_config)?;

        let Some(url) = url.filter(|u| !u.is_empty()) else {
            debug!("Relation changed without a url value; staying disconnected");
            return Ok(Outcome::Completed(UnitStatus::Waiting(
                "waiting for cluster controller relation".into(),
            )));
        };

        let stored = self.store.get(ENDPOINT_KEY)?;
        if stored.as_deref() != Some(url) {
            info!(endpoint = %url, "Storing cluster controller endpoint");
            // Persisted before acting on it; a crash between storing and
            // registering only costs a redelivery.
            self.store.put(ENDPOINT_KEY, url)?;
        }

        let Some(identity) = self.resolver.resolve().await? else {
            debug!("Local pod not schedulable yet; deferring registration");
            return Ok(Outcome::Deferred(DeferReason::NodeNotScheduled));
        };

        let api = self.clusters.connect(url);
        if let Outcome::Deferred(reason) = self.ensure_registered(api.as_ref(), &identity).await? {
            return Ok(Outcome::Deferred(reason));
        }

        self.converge_pools(api.as_ref(), &identity, &desired).await
    }

    /// Register the resolved node with the cluster unless a registration
    /// under the same name already exists.
    async fn ensure_registered(
        &self,
        api: &dyn ClusterApi,
        identity: &NodeIdentity,
    ) -> Result<Outcome> {
        let nodes = match api.list_nodes(Some(&identity.node_name)).await {
            Ok(nodes) => nodes,
            Err(Error::ClusterUnreachable(reason)) => {
                info!(%reason, "Controller unreachable while checking registration; deferring");
                return Ok(Outcome::Deferred(DeferReason::ClusterUnreachable));
            }
            Err(e) => return Err(e),
        };

        if nodes.iter().any(|n| n.name == identity.node_name) {
            debug!(node = %identity.node_name, "Node already registered");
            return Ok(Outcome::Completed(UnitStatus::Maintenance(
                "node registered".into(),
            )));
        }

        info!(
            node = %identity.node_name,
            address = %identity.address,
            "Registering node with cluster as satellite"
        );
        let registration =
            NodeRegistration::satellite(&identity.node_name, &identity.address, &self.app_name);
        match api.create_node(&registration).await {
            Ok(()) => Ok(Outcome::Completed(UnitStatus::Maintenance(
                "node registered".into(),
            ))),
            Err(Error::ClusterUnreachable(reason)) => {
                info!(%reason, "Controller unreachable during registration; deferring");
                Ok(Outcome::Deferred(DeferReason::ClusterUnreachable))
            }
            // Registration rejected by the controller: misconfiguration
            // or permissions, not something redelivery can fix.
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Pool Convergence
    // =========================================================================

    async fn on_config_changed(&self, pool_config: &str) -> Result<Outcome> {
        let desired = parse_storage_pool_config(pool_config)?;

        let Some(endpoint) = self.store.get(ENDPOINT_KEY)? else {
            return Ok(Outcome::Completed(UnitStatus::Waiting(
                "waiting for cluster controller relation".into(),
            )));
        };

        let Some(identity) = self.resolver.resolve().await? else {
            // Platform scheduling lag: skip this pass silently.
            debug!("Local pod not resolvable; skipping pool convergence");
            return Ok(Outcome::Completed(UnitStatus::Waiting(
                "waiting for pod scheduling".into(),
            )));
        };

        let api = self.clusters.connect(&endpoint);
        self.converge_pools(api.as_ref(), &identity, &desired).await
    }

    /// Create every desired pool not already present by name, in declared
    /// order. An existing pool of the same name satisfies its spec
    /// regardless of provider or devices (create-if-absent, never
    /// update-if-different).
    async fn converge_pools(
        &self,
        api: &dyn ClusterApi,
        identity: &NodeIdentity,
        desired: &[StoragePoolSpec],
    ) -> Result<Outcome> {
        let nodes = match api.list_nodes(Some(&identity.node_name)).await {
            Ok(nodes) => nodes,
            Err(Error::ClusterUnreachable(reason)) => {
                info!(%reason, "Controller unreachable while checking node state; deferring");
                return Ok(Outcome::Deferred(DeferReason::ClusterUnreachable));
            }
            Err(e) => return Err(e),
        };

        let online = nodes
            .iter()
            .find(|n| n.name == identity.node_name)
            .map(NodeRegistration::is_online)
            .unwrap_or(false);
        if !online {
            // Pools cannot be created against an offline or unregistered
            // node; wait for the satellite to come up.
            info!(node = %identity.node_name, "Node not online; deferring pool convergence");
            return Ok(Outcome::Deferred(DeferReason::NodeNotOnline));
        }

        let pools = match api.list_storage_pools(&identity.node_name).await {
            Ok(pools) => pools,
            Err(Error::ClusterUnreachable(reason)) => {
                info!(%reason, "Controller unreachable while listing pools; deferring");
                return Ok(Outcome::Deferred(DeferReason::ClusterUnreachable));
            }
            Err(e) => return Err(e),
        };

        let mut present: HashSet<String> =
            pools.into_iter().map(|p| p.storage_pool_name).collect();

        for spec in desired {
            if present.contains(&spec.name) {
                debug!(pool = %spec.name, "Storage pool already present");
                continue;
            }

            let result = if spec.devices.is_empty() {
                let mut props = BTreeMap::new();
                if let Some(provider_name) = &spec.provider_name {
                    props.insert(PROP_STORAGE_POOL_NAME.to_string(), provider_name.clone());
                }
                info!(
                    pool = %spec.name,
                    provider = %spec.provider,
                    "Creating driver-backed storage pool"
                );
                api.create_storage_pool(
                    &identity.node_name,
                    &CreateStoragePool {
                        storage_pool_name: spec.name.clone(),
                        provider_kind: provider_kind(&spec.provider),
                        props,
                    },
                )
                .await
            } else {
                info!(
                    pool = %spec.name,
                    provider = %spec.provider,
                    devices = ?spec.devices,
                    "Creating storage pool from devices"
                );
                api.create_storage_pool_from_devices(
                    &identity.node_name,
                    &CreateDevicePool {
                        provider_kind: provider_kind(&spec.provider),
                        device_paths: spec.devices.clone(),
                        pool_name: spec.provider_name.clone(),
                        with_storage_pool: WithStoragePool {
                            name: spec.name.clone(),
                        },
                    },
                )
                .await
            };

            match result {
                Ok(()) => {
                    present.insert(spec.name.clone());
                }
                Err(Error::ClusterUnreachable(reason)) => {
                    info!(%reason, "Controller unreachable during pool create; deferring");
                    return Ok(Outcome::Deferred(DeferReason::ClusterUnreachable));
                }
                // A rejected pool create (invalid provider, device busy)
                // is a genuine misconfiguration.
                Err(e) => return Err(e),
            }
        }

        Ok(Outcome::Completed(UnitStatus::Active))
    }

    // =========================================================================
    // Relation Broken
    // =========================================================================

    async fn on_relation_broken(&self) -> Result<Outcome> {
        let endpoint = self.store.get(ENDPOINT_KEY)?;

        let mut failure = None;
        if let Some(endpoint) = &endpoint {
            // An identity lookup failure must not leave the endpoint
            // behind; teardown is already best-effort.
            let identity = match self.resolver.resolve().await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(
                        error = %e,
                        "Could not resolve local node during teardown; skipping deregistration"
                    );
                    None
                }
            };
            if let Some(identity) = identity {
                let api = self.clusters.connect(endpoint);
                match api.delete_node(&identity.node_name).await {
                    Ok(()) => {
                        info!(node = %identity.node_name, "Deregistered node from cluster")
                    }
                    Err(Error::ClusterUnreachable(reason)) => {
                        // The controller is presumably already gone;
                        // failing to deregister is not actionable.
                        warn!(
                            node = %identity.node_name,
                            %reason,
                            "Controller unreachable during deregistration; skipping"
                        );
                    }
                    Err(e) => failure = Some(e),
                }
            }
        }

        // Cleared no matter how deregistration went.
        self.store.delete(ENDPOINT_KEY)?;

        match failure {
            Some(e) => Err(e),
            None => Ok(Outcome::Completed(UnitStatus::Waiting(
                "waiting for cluster controller relation".into(),
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
