//! Error types for the satellite storage operator
//!
//! Provides structured error types for all operator components including
//! pool-config parsing, the cluster API adapter, node identity resolution,
//! and the reconciliation state machine.

use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Pool Configuration Parse Errors
    // =========================================================================
    #[error("Storage pool config parse error: {0}")]
    ConfigParse(String),

    // =========================================================================
    // Cluster API Errors
    // =========================================================================
    /// The controller process is not answering at the transport level.
    /// Always transient: the triggering event is deferred, never failed.
    #[error("Cluster controller unreachable: {0}")]
    ClusterUnreachable(String),

    /// The controller answered but at least one embedded response code
    /// signals an application-level failure.
    #[error("Cluster API error during {operation}: {message} (ret_code {ret_code})")]
    ClusterApi {
        operation: String,
        ret_code: i64,
        message: String,
    },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Parse/IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Re-queue the triggering event for later redelivery
    Defer,
    /// Surface to the unit's status and halt the pass; redelivery without
    /// an operator fixing the input is pointless
    Fail,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transport-level failures: the controller is not there yet
            // (or already gone); retry on the next delivery.
            Error::ClusterUnreachable(_) => ErrorAction::Defer,

            // Application-level and configuration errors indicate a genuine
            // misconfiguration or permissions issue.
            Error::ClusterApi { .. }
            | Error::ConfigParse(_)
            | Error::Configuration(_) => ErrorAction::Fail,

            _ => ErrorAction::Fail,
        }
    }

    /// Check if this error is transient (absorbed via deferral)
    pub fn is_transient(&self) -> bool {
        matches!(self.action(), ErrorAction::Defer)
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::ClusterUnreachable("connection refused".into());
        assert_eq!(err.action(), ErrorAction::Defer);
        assert!(err.is_transient());

        let err = Error::ClusterApi {
            operation: "create_storage_pool".into(),
            ret_code: -1,
            message: "Invalid provider".into(),
        };
        assert_eq!(err.action(), ErrorAction::Fail);
        assert!(!err.is_transient());

        let err = Error::ConfigParse("unknown key 'devics'".into());
        assert_eq!(err.action(), ErrorAction::Fail);
        assert!(!err.is_transient());
    }
}
