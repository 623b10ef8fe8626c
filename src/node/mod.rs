//! Local node identity
//!
//! Maps this operator unit onto the cluster-member node it runs on, by
//! matching the unit identifier against pod metadata.

pub mod identity;

pub use identity::*;
