//! Satellite Storage Operator
//!
//! Reconciles a storage node against a LINSTOR-style cluster controller:
//! registers the local node as a satellite when the controller relation
//! forms, converges the node's storage pools toward the declared set on
//! every configuration pass, and deregisters on relation-broken.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Event Loop (runner)                   │
//! │   relation data / pool config, re-read every tick            │
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │ Event (endpoint-changed / config-changed /
//!                 │        relation-broken), deferred events
//!                 │        redelivered behind newer ones
//! ┌───────────────┴──────────────────────────────────────────────┐
//! │                 Reconciliation State Machine                 │
//! │   Disconnected → Registering → PoolSyncing → Converged       │
//! └───┬──────────────────┬───────────────────┬───────────────────┘
//!     │                  │                   │
//! ┌───┴────────┐  ┌──────┴─────────┐  ┌──────┴────────────────┐
//! │ StateStore │  │ IdentityResolver│  │ ClusterApi (REST)     │
//! │ (endpoint) │  │ (pod metadata)  │  │ nodes / storage pools │
//! └────────────┘  └────────────────┘  └───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: storage-pool mini-language parser
//! - [`cluster`]: cluster controller API client and wire types
//! - [`node`]: local node identity resolution
//! - [`reconciler`]: the convergence state machine
//! - [`runner`]: single-threaded event delivery with deferral
//! - [`state`]: persisted unit state
//! - [`error`]: error types and defer-vs-fail classification

pub mod cluster;
pub mod config;
pub mod error;
pub mod node;
pub mod reconciler;
pub mod runner;
pub mod state;

// Re-export commonly used types
pub use cluster::{
    ClusterApi, ClusterApiFactory, NodeRegistration, RestClusterApi, RestClusterFactory,
    StoragePool,
};
pub use config::{parse_storage_pool_config, StoragePoolSpec};
pub use error::{Error, ErrorAction, Result};
pub use node::{IdentityResolver, NodeIdentity, PodIdentityResolver};
pub use reconciler::{DeferReason, Event, Outcome, Reconciler, UnitStatus, ENDPOINT_KEY};
pub use runner::{FileInputSource, InputSource, Runner};
pub use state::{FileStateStore, MemoryStateStore, StateStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
