//! Reconciliation state machine
//!
//! Converges the local storage node toward its declared state against the
//! cluster controller: node registration as the controller relation forms,
//! storage-pool convergence on every configuration pass, deregistration
//! when the relation breaks.
//!
//! Per unit the machine moves through `Disconnected` (no endpoint) →
//! `Registering` → `PoolSyncing` → `Converged`, and back to
//! `Disconnected` on relation-broken. The states are not stored; every
//! delivery re-derives them from the persisted endpoint and the observed
//! cluster state, so redelivery of a deferred event with arbitrary delay
//! is always safe.

pub mod machine;

pub use machine::*;

// =============================================================================
// Events
// =============================================================================

/// A lifecycle or configuration event delivered to the reconciler.
///
/// Events carry their inputs by value: configuration is re-read by the
/// surrounding loop on every delivery, never cached by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Controller relation data changed; `url` is the relation's `url` key
    EndpointChanged {
        url: Option<String>,
        pool_config: String,
    },
    /// Configuration changed (or a periodic convergence tick)
    ConfigChanged { pool_config: String },
    /// Controller relation broken
    RelationBroken,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a pass determined "not ready yet" and asked for redelivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The controller is not answering at the transport level
    ClusterUnreachable,
    /// The platform has not scheduled the local pod or populated its
    /// metadata yet
    NodeNotScheduled,
    /// The node is registered but its satellite is not online; pools
    /// cannot be created against an offline node
    NodeNotOnline,
}

/// Unit status reported after a completed pass (three levels per the
/// platform's status model)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Blocked or waiting on an external condition
    Waiting(String),
    /// Reconciliation in progress
    Maintenance(String),
    /// Registered and all declared pools present
    Active,
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The pass ran to completion
    Completed(UnitStatus),
    /// Re-queue the same logical event for later redelivery
    Deferred(DeferReason),
}
