//! Provisioner Configuration
//!
//! Static settings shared by the scheduler and the volume reconciler, plus
//! the per-storage-class default node selector table read once at startup.

use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Constants
// =============================================================================

/// Provisioner identity written on storage classes and claims
pub const DEFAULT_PROVISIONER_NAME: &str = "localvolume.io/local";

/// Claim annotation naming the provisioner responsible for it
pub const PROVISIONER_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-provisioner";

/// Claim annotation carrying a JSON map of required node labels
pub const NODE_SELECTOR_ANNOTATION: &str = "localvolume.io/nodeSelector";

/// Claim annotation carrying the node chosen by the scheduler
pub const NODE_NAME_ANNOTATION: &str = "localvolume.io/nodeName";

/// Node status capacity entry holding the remaining local volume capacity
pub const LV_CAPACITY_RESOURCE: &str = "localvolume.io/lv-capacity";

/// Default location of the default-selector table
pub const DEFAULT_SELECTOR_FILE: &str = "/etc/config/config.yml";

/// Default project-quota command
pub const DEFAULT_QUOTA_COMMAND: &str = "xfs_quota";

// =============================================================================
// Policies
// =============================================================================

/// How writes treat the optimistic-concurrency token of a fetched record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UpdatePolicy {
    /// Drop the resource version and overwrite whatever is stored
    #[default]
    Overwrite,
    /// Send the resource version; a stale copy is rejected as a conflict
    DetectConflicts,
}

impl UpdatePolicy {
    /// Resource version to send with a write of a record fetched at `current`
    pub fn resource_version(&self, current: Option<String>) -> Option<String> {
        match self {
            UpdatePolicy::Overwrite => None,
            UpdatePolicy::DetectConflicts => current,
        }
    }
}

/// Host cleanup performed when a `Delete` volume goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TeardownMode {
    /// Unmount, clear quotas, prune host files, delete the tree, release capacity
    #[default]
    Full,
    /// Delete the tree and release capacity only
    DirectoryOnly,
}

/// Which watch feeds a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RunMode {
    /// Claim scheduling and volume lifecycle
    #[default]
    All,
    /// Claim scheduling only (cluster-wide deployment)
    Scheduler,
    /// Volume lifecycle for this node only (per-node deployment)
    NodeAgent,
}

impl RunMode {
    pub fn runs_scheduler(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Scheduler)
    }

    pub fn runs_node_agent(&self) -> bool {
        matches!(self, RunMode::All | RunMode::NodeAgent)
    }
}

// =============================================================================
// Host Files
// =============================================================================

/// Line-oriented host files edited during teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFiles {
    /// Project id to directory mapping (`/etc/projects`)
    pub projects: PathBuf,
    /// Project name to id mapping (`/etc/projid`)
    pub projid: PathBuf,
    /// Mount table (`/etc/fstab`)
    pub mount_table: PathBuf,
}

impl HostFiles {
    /// Files below a host root, e.g. `/rootfs` when the host is bind-mounted
    pub fn under_root(root: &Path) -> Self {
        Self {
            projects: root.join("etc/projects"),
            projid: root.join("etc/projid"),
            mount_table: root.join("etc/fstab"),
        }
    }
}

impl Default for HostFiles {
    fn default() -> Self {
        Self::under_root(Path::new("/"))
    }
}

// =============================================================================
// Provisioner Configuration
// =============================================================================

/// Configuration shared by every component
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Provisioner identity matched against claims and storage classes
    pub provisioner_name: String,
    /// Claim annotation naming the responsible provisioner
    pub provisioner_annotation: String,
    /// Claim annotation holding the requested node selector
    pub node_selector_annotation: String,
    /// Claim annotation receiving the chosen node
    pub node_name_annotation: String,
    /// Node capacity entry used as the ledger
    pub capacity_resource: String,
    /// Treatment of resource versions on claim and node writes
    pub update_policy: UpdatePolicy,
    /// Cleanup performed on volume deletion
    pub teardown_mode: TeardownMode,
    /// Host files pruned during teardown
    pub host_files: HostFiles,
    /// Mount point of the local volume filesystem
    pub storage_path: PathBuf,
    /// Project-quota command
    pub quota_command: String,
    /// Deadline for every store call and quota invocation
    pub request_timeout: Duration,
    /// Interval at which cached claims are delivered again
    pub claim_resync: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            provisioner_name: DEFAULT_PROVISIONER_NAME.to_string(),
            provisioner_annotation: PROVISIONER_ANNOTATION.to_string(),
            node_selector_annotation: NODE_SELECTOR_ANNOTATION.to_string(),
            node_name_annotation: NODE_NAME_ANNOTATION.to_string(),
            capacity_resource: LV_CAPACITY_RESOURCE.to_string(),
            update_policy: UpdatePolicy::default(),
            teardown_mode: TeardownMode::default(),
            host_files: HostFiles::default(),
            storage_path: PathBuf::from("/mnt/local-volumes"),
            quota_command: DEFAULT_QUOTA_COMMAND.to_string(),
            request_timeout: Duration::from_secs(30),
            claim_resync: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Default Selector Table
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefaultSelectorEntry {
    default_node_selector: String,
}

/// Storage class to default node selector mapping, immutable once loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultSelectorTable {
    entries: BTreeMap<String, String>,
}

impl DefaultSelectorTable {
    /// Table with no defaults
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the YAML document
    ///
    /// ```yaml
    /// sc-local:
    ///   defaultNodeSelector: '"zone":"a","disk":"ssd"'
    /// ```
    pub fn from_yaml(document: &str) -> Result<Self> {
        if document.trim().is_empty() {
            return Ok(Self::empty());
        }
        let parsed: BTreeMap<String, DefaultSelectorEntry> = serde_yaml::from_str(document)?;
        Ok(Self {
            entries: parsed
                .into_iter()
                .map(|(class, entry)| (class, entry.default_node_selector))
                .collect(),
        })
    }

    /// Read and parse the table from a file
    pub fn load(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_yaml(&document)
    }

    /// Read the table, falling back to an empty one when it is missing or malformed
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(table) => {
                info!(
                    path = %path.display(),
                    storage_classes = table.len(),
                    "Loaded default node selectors"
                );
                table
            }
            Err(e) => {
                info!(
                    "Cannot parse default node selectors from {}: {}, continuing without them",
                    path.display(),
                    e
                );
                Self::empty()
            }
        }
    }

    /// Raw default selector of a storage class
    pub fn get(&self, storage_class: &str) -> Option<&str> {
        self.entries.get(storage_class).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for DefaultSelectorTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_selector_table_from_yaml() {
        let table = DefaultSelectorTable::from_yaml(
            r#"
sc-local:
  defaultNodeSelector: '"zone":"a"'
sc-fast:
  defaultNodeSelector: '{"disk":"ssd","zone":"b"}'
"#,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("sc-local"), Some(r#""zone":"a""#));
        assert_eq!(table.get("sc-fast"), Some(r#"{"disk":"ssd","zone":"b"}"#));
        assert_eq!(table.get("sc-other"), None);
    }

    #[test]
    fn test_selector_table_empty_document() {
        assert!(DefaultSelectorTable::from_yaml("").unwrap().is_empty());
        assert!(DefaultSelectorTable::from_yaml("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_selector_table_degrades_to_empty() {
        let missing = DefaultSelectorTable::load_or_empty(Path::new("/nonexistent/config.yml"));
        assert!(missing.is_empty());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sc-local: [not, a, map").unwrap();
        assert!(DefaultSelectorTable::load(file.path()).is_err());
        assert!(DefaultSelectorTable::load_or_empty(file.path()).is_empty());
    }

    #[test]
    fn test_selector_table_loads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sc-local:\n  defaultNodeSelector: '\"zone\":\"a\"'").unwrap();
        let table = DefaultSelectorTable::load_or_empty(file.path());
        assert_eq!(table.get("sc-local"), Some(r#""zone":"a""#));
    }

    #[test]
    fn test_update_policy_resource_version() {
        let rv = Some("42".to_string());
        assert_eq!(UpdatePolicy::Overwrite.resource_version(rv.clone()), None);
        assert_eq!(UpdatePolicy::DetectConflicts.resource_version(rv), Some("42".into()));
    }

    #[test]
    fn test_host_files_under_root() {
        let files = HostFiles::under_root(Path::new("/rootfs"));
        assert_eq!(files.projects, PathBuf::from("/rootfs/etc/projects"));
        assert_eq!(files.projid, PathBuf::from("/rootfs/etc/projid"));
        assert_eq!(files.mount_table, PathBuf::from("/rootfs/etc/fstab"));
        assert_eq!(HostFiles::default().mount_table, PathBuf::from("/etc/fstab"));
    }

    #[test]
    fn test_run_mode() {
        assert!(RunMode::All.runs_scheduler() && RunMode::All.runs_node_agent());
        assert!(RunMode::Scheduler.runs_scheduler() && !RunMode::Scheduler.runs_node_agent());
        assert!(!RunMode::NodeAgent.runs_scheduler() && RunMode::NodeAgent.runs_node_agent());
    }
}
