//! Domain Ports - Core records and trait definitions for the provisioner
//!
//! These traits define the boundaries between the scheduling/teardown logic
//! and the cluster object store or the host. Adapters implement them; the
//! in-memory store used by the unit tests implements them too.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Claim Requests
// =============================================================================

/// Phase of a claim request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Other,
}

impl ClaimPhase {
    /// Map the API server's phase string
    pub fn from_api(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => ClaimPhase::Pending,
            Some("Bound") => ClaimPhase::Bound,
            _ => ClaimPhase::Other,
        }
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimPhase::Pending => write!(f, "Pending"),
            ClaimPhase::Bound => write!(f, "Bound"),
            ClaimPhase::Other => write!(f, "Other"),
        }
    }
}

/// A request for local storage (a persistent volume claim)
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub namespace: String,
    pub name: String,
    /// Requested storage class
    pub storage_class: Option<String>,
    pub annotations: BTreeMap<String, String>,
    pub phase: ClaimPhase,
    /// Optimistic-concurrency token; `None` makes the next write a blind overwrite
    pub resource_version: Option<String>,
}

impl ClaimRequest {
    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Look up an annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

// =============================================================================
// Volumes
// =============================================================================

/// What happens to a volume's storage once it is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimPolicy {
    Delete,
    Retain,
    Recycle,
}

impl ReclaimPolicy {
    /// Map the API server's policy string; unset or unknown means `Retain`
    pub fn from_api(policy: Option<&str>) -> Self {
        match policy {
            Some("Delete") => ReclaimPolicy::Delete,
            Some("Recycle") => ReclaimPolicy::Recycle,
            _ => ReclaimPolicy::Retain,
        }
    }
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimPolicy::Delete => write!(f, "Delete"),
            ReclaimPolicy::Retain => write!(f, "Retain"),
            ReclaimPolicy::Recycle => write!(f, "Recycle"),
        }
    }
}

/// A provisioned local volume
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub name: String,
    pub storage_class: Option<String>,
    pub reclaim_policy: ReclaimPolicy,
    /// Raw `storage` capacity quantity
    pub capacity: Option<String>,
    /// Host-local directory backing the volume
    pub local_path: Option<String>,
    /// Textual form of the required node affinity
    pub node_affinity: Option<String>,
    pub phase: Option<String>,
}

// =============================================================================
// Nodes
// =============================================================================

/// A cluster node as seen by the ledger and the picker
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Status capacity map, values are raw quantity strings
    pub capacity: BTreeMap<String, String>,
    /// Optimistic-concurrency token; `None` makes the next write a blind overwrite
    pub resource_version: Option<String>,
}

// =============================================================================
// Object Store Ports
// =============================================================================

/// Port for node reads and status-only capacity writes
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node by name
    async fn get_node(&self, name: &str) -> Result<NodeRecord>;

    /// List nodes matching a `key=value,...` label selector (empty matches all)
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeRecord>>;

    /// Write one status capacity entry; guarded by the record's resource
    /// version when it carries one
    async fn update_capacity(&self, node: &NodeRecord, resource: &str, value: &str) -> Result<()>;
}

/// Port for claim annotation updates
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Merge one annotation into the stored claim; guarded by the claim's
    /// resource version when it carries one
    async fn annotate(&self, claim: &ClaimRequest, key: &str, value: &str) -> Result<()>;
}

/// Port for storage class lookups
#[async_trait]
pub trait StorageClassStore: Send + Sync {
    /// Provisioner identity of a storage class
    async fn provisioner_of(&self, storage_class: &str) -> Result<String>;
}

// =============================================================================
// Host Ports
// =============================================================================

/// Port for host filesystem operations on volume directories
#[async_trait]
pub trait HostVolumeOps: Send + Sync {
    /// Unmount a volume path
    async fn unmount(&self, path: &Path) -> Result<()>;

    /// Recursively delete a directory tree
    async fn remove_tree(&self, path: &Path) -> Result<()>;

    /// Bytes available to unprivileged users on the filesystem holding `path`
    async fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Port for the external project-quota command
#[async_trait]
pub trait QuotaTool: Send + Sync {
    /// Set soft and hard block limits of a project to zero
    async fn reset_limits(&self, project: &str) -> Result<()>;

    /// Clear the project mapping of a directory
    async fn remove_project(&self, project: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type NodeStoreRef = Arc<dyn NodeStore>;
pub type ClaimStoreRef = Arc<dyn ClaimStore>;
pub type StorageClassStoreRef = Arc<dyn StorageClassStore>;
pub type HostVolumeOpsRef = Arc<dyn HostVolumeOps>;
pub type QuotaToolRef = Arc<dyn QuotaTool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(ClaimPhase::from_api(Some("Pending")), ClaimPhase::Pending);
        assert_eq!(ClaimPhase::from_api(Some("Bound")), ClaimPhase::Bound);
        assert_eq!(ClaimPhase::from_api(Some("Lost")), ClaimPhase::Other);
        assert_eq!(ClaimPhase::from_api(None), ClaimPhase::Other);
    }

    #[test]
    fn test_reclaim_policy_mapping() {
        assert_eq!(ReclaimPolicy::from_api(Some("Delete")), ReclaimPolicy::Delete);
        assert_eq!(ReclaimPolicy::from_api(Some("Recycle")), ReclaimPolicy::Recycle);
        assert_eq!(ReclaimPolicy::from_api(Some("Retain")), ReclaimPolicy::Retain);
        assert_eq!(ReclaimPolicy::from_api(None), ReclaimPolicy::Retain);
        assert_eq!(format!("{}", ReclaimPolicy::Delete), "Delete");
    }

    #[test]
    fn test_claim_key() {
        let claim = ClaimRequest {
            namespace: "default".into(),
            name: "c1".into(),
            storage_class: None,
            annotations: BTreeMap::from([("a".to_string(), "b".to_string())]),
            phase: ClaimPhase::Pending,
            resource_version: None,
        };
        assert_eq!(claim.key(), "default/c1");
        assert_eq!(claim.annotation("a"), Some("b"));
        assert_eq!(claim.annotation("missing"), None);
    }
}
