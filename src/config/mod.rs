//! Operator configuration
//!
//! The storage-pool mini-language parser and the desired-state records it
//! produces. Re-parsed from the raw config option on every reconciliation
//! pass; nothing here is persisted.

pub mod pool;

pub use pool::*;
