//! Wire types for the cluster controller management API
//!
//! Mirrors the controller's REST representation of nodes, storage pools,
//! and per-operation response codes. Only the fields the reconciler reads
//! or writes are modeled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Constants
// =============================================================================

/// Node type under which storage nodes register themselves
pub const NODE_TYPE_SATELLITE: &str = "SATELLITE";

/// Connection state reported for a registered node that is reachable and
/// serving; pools can only be created against an online node
pub const CONNECTION_ONLINE: &str = "ONLINE";

/// Auxiliary node property tagging which operator application registered
/// the node, used to recognize our own registrations
pub const PROP_REGISTERED_BY: &str = "Aux/registered-by";

/// Name of the network interface registered for a satellite node
pub const DEFAULT_NET_INTERFACE: &str = "default";

/// Storage pool property naming the provider-side pool backing it
pub const PROP_STORAGE_POOL_NAME: &str = "StorDriver/StorPoolName";

// =============================================================================
// Response Codes
// =============================================================================

/// A single embedded per-operation response code.
///
/// The controller reports application-level results inside the response
/// body; a 200-level transport status can still carry a failed operation.
/// Negative `ret_code` values signal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallRc {
    pub ret_code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ApiCallRc {
    pub fn is_error(&self) -> bool {
        self.ret_code < 0
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// A network interface on a registered node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetInterface {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_port: Option<u16>,
}

/// The cluster's record that a node is a member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub net_interfaces: Vec<NetInterface>,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_status: Option<String>,
}

impl NodeRegistration {
    /// Build the registration request for a satellite node
    pub fn satellite(name: &str, address: &str, registered_by: &str) -> Self {
        let mut props = BTreeMap::new();
        props.insert(PROP_REGISTERED_BY.to_string(), registered_by.to_string());

        Self {
            name: name.to_string(),
            node_type: NODE_TYPE_SATELLITE.to_string(),
            net_interfaces: vec![NetInterface {
                name: DEFAULT_NET_INTERFACE.to_string(),
                address: address.to_string(),
                satellite_port: None,
            }],
            props,
            connection_status: None,
        }
    }

    /// Whether the node's own registration is in the online connection state
    pub fn is_online(&self) -> bool {
        self.connection_status.as_deref() == Some(CONNECTION_ONLINE)
    }
}

// =============================================================================
// Storage Pools
// =============================================================================

/// Actual state of a storage pool on a node, as reported by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePool {
    pub storage_pool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_kind: Option<String>,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

/// Request to create a driver-backed storage pool on an existing
/// provider-side pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStoragePool {
    pub storage_pool_name: String,
    pub provider_kind: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

/// Request to create a provider pool from raw devices, together with the
/// storage pool on top of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDevicePool {
    pub provider_kind: String,
    pub device_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,
    pub with_storage_pool: WithStoragePool,
}

/// Storage pool definition nested in a device-pool create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithStoragePool {
    pub name: String,
}

// =============================================================================
// Provider Kinds
// =============================================================================

/// Map a lowercase provider name from the pool config onto the API's
/// provider kind. Unknown values pass through uppercased; the controller
/// rejects them with an application-level response code.
pub fn provider_kind(provider: &str) -> String {
    match provider {
        "lvm" => "LVM".to_string(),
        "lvmthin" => "LVM_THIN".to_string(),
        "zfs" => "ZFS".to_string(),
        "zfsthin" => "ZFS_THIN".to_string(),
        "diskless" => "DISKLESS".to_string(),
        other => other.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_call_rc_error_detection() {
        let ok = ApiCallRc {
            ret_code: 1,
            message: "Node created".into(),
            cause: None,
        };
        assert!(!ok.is_error());

        let err = ApiCallRc {
            ret_code: -3,
            message: "Invalid storage pool name".into(),
            cause: None,
        };
        assert!(err.is_error());
    }

    #[test]
    fn test_satellite_registration_shape() {
        let reg = NodeRegistration::satellite("worker-0", "10.0.0.5", "satellite-app");
        assert_eq!(reg.node_type, NODE_TYPE_SATELLITE);
        assert_eq!(reg.net_interfaces.len(), 1);
        assert_eq!(reg.net_interfaces[0].address, "10.0.0.5");
        assert_eq!(
            reg.props.get(PROP_REGISTERED_BY).map(String::as_str),
            Some("satellite-app")
        );
        assert!(!reg.is_online());
    }

    #[test]
    fn test_node_online_state() {
        let mut reg = NodeRegistration::satellite("worker-0", "10.0.0.5", "app");
        reg.connection_status = Some(CONNECTION_ONLINE.into());
        assert!(reg.is_online());

        reg.connection_status = Some("OFFLINE".into());
        assert!(!reg.is_online());
    }

    #[test]
    fn test_provider_kind_mapping() {
        assert_eq!(provider_kind("lvmthin"), "LVM_THIN");
        assert_eq!(provider_kind("zfs"), "ZFS");
        assert_eq!(provider_kind("diskless"), "DISKLESS");
        assert_eq!(provider_kind("exos"), "EXOS");
    }
}
