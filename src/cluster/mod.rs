//! Cluster controller management API
//!
//! Wire types and the scoped HTTP client adapter for the storage-cluster
//! controller. All cluster-side entities (node registrations, storage
//! pools) are owned by the remote controller; this side only issues
//! idempotent create/delete requests.

pub mod client;
pub mod types;

pub use client::*;
pub use types::*;
