//! Error types for the Local Volume Provisioner
//!
//! Every failure inside an event handler is logged where it happens and the
//! triggering event is abandoned. Only startup failures and an unexpectedly
//! closed watch feed stop the process.

use thiserror::Error;

/// Unified error type for the provisioner
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
    // Parse Errors
    // =========================================================================
    #[error("Node selector parse error: {0}")]
    SelectorParse(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Update conflict on {kind}/{name}: resource version is stale")]
    Conflict { kind: String, name: String },

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: String },

    #[error("Watch feed for {kind} closed unexpectedly")]
    WatchClosed { kind: String },

    // =========================================================================
    // Scheduling Errors
    // =========================================================================
    #[error("No nodes found for label selector '{selector}'")]
    NoNodesMatch { selector: String },

    #[error("No node matching '{selector}' advertises local volume capacity yet")]
    NoCapacityAdvertised { selector: String },

    #[error("Cannot commit node assignment for claim {claim}: {cause}")]
    CommitFailed { claim: String, cause: String },

    // =========================================================================
    // Capacity Ledger Errors
    // =========================================================================
    #[error("Node {node} has no local volume capacity entry")]
    NodeCapacityMissing { node: String },

    #[error("Capacity ledger update failed for node {node}: {cause}")]
    LedgerUpdateFailed { node: String, cause: String },

    // =========================================================================
    // Host Cleanup Errors
    // =========================================================================
    #[error("Teardown of volume {volume} failed at step '{step}': {reason}")]
    CleanupStepFailed {
        volume: String,
        step: String,
        reason: String,
    },

    #[error("Failed to launch {command}: {reason}")]
    ProcessLaunchFailed { command: String, reason: String },

    #[error("Quota command '{command}' failed: {reason}")]
    QuotaCommand { command: String, reason: String },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Syscall(#[from] nix::Error),
}

/// What the caller should do once an error has been logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Drop the event; the next resync or update delivers it again
    WaitForResync,
    /// Stop the process with a non-zero exit code
    Fatal,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::WatchClosed { .. } | Error::Configuration(_) => ErrorAction::Fatal,
            _ => ErrorAction::WaitForResync,
        }
    }

    /// Check if this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self.action(), ErrorAction::Fatal)
    }

    /// Check if this error is an optimistic-concurrency rejection
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Check if this error means the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
