//! Volume Lifecycle Reconciler
//!
//! Node-local handling of volume events. A newly bound volume takes its
//! capacity out of this node's ledger; a deleted `Delete` volume is torn
//! down step by step and its capacity handed back. Only volumes of this
//! provisioner whose node affinity names this node are considered.

use super::journal::QuotaJournal;
use crate::capacity::{CapacityLedger, StorageQuantity};
use crate::config::{ProvisionerConfig, TeardownMode};
use crate::domain::events::{EventHandler, ObjectEvent, VolumeEvent};
use crate::domain::ports::{
    HostVolumeOpsRef, NodeStoreRef, QuotaToolRef, ReclaimPolicy, StorageClassStoreRef, Volume,
};
use crate::error::{Error, Result};
use crate::metrics::ProvisionerMetrics;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Teardown Steps
// =============================================================================

/// One step of volume teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Unmount,
    ResetQuotaLimits,
    RemoveQuotaProject,
    PruneProjectsFile,
    PruneProjidFile,
    PruneMountTable,
    RemoveDirectory,
    ReleaseCapacity,
}

impl TeardownStep {
    const FULL: [TeardownStep; 8] = [
        TeardownStep::Unmount,
        TeardownStep::ResetQuotaLimits,
        TeardownStep::RemoveQuotaProject,
        TeardownStep::PruneProjectsFile,
        TeardownStep::PruneProjidFile,
        TeardownStep::PruneMountTable,
        TeardownStep::RemoveDirectory,
        TeardownStep::ReleaseCapacity,
    ];

    const DIRECTORY_ONLY: [TeardownStep; 2] =
        [TeardownStep::RemoveDirectory, TeardownStep::ReleaseCapacity];

    /// Steps run for a mode, in order
    pub fn sequence(mode: TeardownMode) -> &'static [TeardownStep] {
        match mode {
            TeardownMode::Full => &Self::FULL,
            TeardownMode::DirectoryOnly => &Self::DIRECTORY_ONLY,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TeardownStep::Unmount => "unmount",
            TeardownStep::ResetQuotaLimits => "reset-quota-limits",
            TeardownStep::RemoveQuotaProject => "remove-quota-project",
            TeardownStep::PruneProjectsFile => "prune-projects-file",
            TeardownStep::PruneProjidFile => "prune-projid-file",
            TeardownStep::PruneMountTable => "prune-mount-table",
            TeardownStep::RemoveDirectory => "remove-directory",
            TeardownStep::ReleaseCapacity => "release-capacity",
        }
    }
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of handling one volume event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOutcome {
    /// Not ours, not on this node, or an update
    Ignored,
    /// Capacity taken out of the ledger
    Reserved,
    /// Torn down and capacity handed back
    Released,
    /// Deleted with a non-`Delete` reclaim policy; left alone
    Retained,
    /// A step failed; logged and dropped
    Abandoned,
}

impl VolumeOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            VolumeOutcome::Ignored => "ignored",
            VolumeOutcome::Reserved => "reserved",
            VolumeOutcome::Released => "released",
            VolumeOutcome::Retained => "retained",
            VolumeOutcome::Abandoned => "abandoned",
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

pub struct VolumeLifecycleReconciler {
    node_name: String,
    provisioner_name: String,
    storage_path: PathBuf,
    teardown_mode: TeardownMode,
    classes: StorageClassStoreRef,
    ledger: CapacityLedger,
    host: HostVolumeOpsRef,
    quota: QuotaToolRef,
    journal: QuotaJournal,
    metrics: Arc<ProvisionerMetrics>,
}

impl VolumeLifecycleReconciler {
    pub fn new(
        node_name: impl Into<String>,
        config: &ProvisionerConfig,
        nodes: NodeStoreRef,
        classes: StorageClassStoreRef,
        host: HostVolumeOpsRef,
        quota: QuotaToolRef,
        metrics: Arc<ProvisionerMetrics>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            provisioner_name: config.provisioner_name.clone(),
            storage_path: config.storage_path.clone(),
            teardown_mode: config.teardown_mode,
            classes,
            ledger: CapacityLedger::from_config(nodes, config),
            host,
            quota,
            journal: QuotaJournal::new(config.host_files.clone()),
            metrics,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Seed this node's ledger from the free space of the storage filesystem
    pub async fn initialize_capacity(&self) -> Result<StorageQuantity> {
        let available = self.host.available_bytes(&self.storage_path).await?;
        self.ledger.initialize(&self.node_name, available).await
    }

    /// Our storage class and an affinity that names this node
    pub async fn is_relevant(&self, volume: &Volume) -> bool {
        let Some(class) = volume.storage_class.as_deref() else {
            return false;
        };
        match self.classes.provisioner_of(class).await {
            Ok(provisioner) if provisioner == self.provisioner_name => {}
            Ok(_) => return false,
            Err(e) => {
                debug!(volume = %volume.name, class, "Storage class lookup failed: {}", e);
                return false;
            }
        }
        volume
            .node_affinity
            .as_deref()
            .is_some_and(|affinity| affinity.contains(&self.node_name))
    }

    /// Handle one volume event; failures are logged here and never returned
    pub async fn handle(&self, event: VolumeEvent) -> VolumeOutcome {
        let outcome = match event {
            ObjectEvent::Added(volume) => self.on_added(&volume).await,
            ObjectEvent::Updated { new, .. } => {
                debug!(volume = %new.name, "Ignoring volume update");
                VolumeOutcome::Ignored
            }
            ObjectEvent::Deleted(volume) => self.on_deleted(&volume).await,
        };
        self.metrics.record_volume(outcome.label());
        outcome
    }

    async fn on_added(&self, volume: &Volume) -> VolumeOutcome {
        if !self.is_relevant(volume).await {
            return VolumeOutcome::Ignored;
        }

        match self.reserve(volume).await {
            Ok(remaining) => {
                info!(
                    volume = %volume.name,
                    node = %self.node_name,
                    remaining = %remaining,
                    "Reserved capacity for volume"
                );
                VolumeOutcome::Reserved
            }
            Err(e) => {
                error!(volume = %volume.name, node = %self.node_name, "Cannot reserve capacity: {}", e);
                VolumeOutcome::Abandoned
            }
        }
    }

    async fn on_deleted(&self, volume: &Volume) -> VolumeOutcome {
        if !self.is_relevant(volume).await {
            return VolumeOutcome::Ignored;
        }
        if volume.reclaim_policy != ReclaimPolicy::Delete {
            debug!(
                volume = %volume.name,
                policy = %volume.reclaim_policy,
                "Leaving released volume in place"
            );
            return VolumeOutcome::Retained;
        }

        match self.teardown(volume).await {
            Ok(()) => VolumeOutcome::Released,
            Err(e) => {
                error!(volume = %volume.name, node = %self.node_name, "{}", e);
                VolumeOutcome::Abandoned
            }
        }
    }

    async fn reserve(&self, volume: &Volume) -> Result<StorageQuantity> {
        let capacity = capacity_of(volume)?;
        self.ledger.decrease(&self.node_name, &capacity).await
    }

    /// Run the teardown sequence, stopping at the first failing step
    pub async fn teardown(&self, volume: &Volume) -> Result<()> {
        let steps = TeardownStep::sequence(self.teardown_mode);

        let Some(path) = volume.local_path.as_deref().map(Path::new) else {
            return Err(Error::CleanupStepFailed {
                volume: volume.name.clone(),
                step: steps[0].to_string(),
                reason: "volume has no local path".into(),
            });
        };
        let project = project_name(path);

        for step in steps {
            if let Err(e) = self.run_step(*step, volume, path, &project).await {
                self.metrics.record_teardown_failure(step.label());
                return Err(Error::CleanupStepFailed {
                    volume: volume.name.clone(),
                    step: step.to_string(),
                    reason: e.to_string(),
                });
            }
            debug!(volume = %volume.name, step = %step, "Teardown step done");
        }

        info!(
            volume = %volume.name,
            node = %self.node_name,
            path = %path.display(),
            "Volume torn down"
        );
        Ok(())
    }

    async fn run_step(&self, step: TeardownStep, volume: &Volume, path: &Path, project: &str) -> Result<()> {
        match step {
            TeardownStep::Unmount => self.host.unmount(path).await,
            TeardownStep::ResetQuotaLimits => self.quota.reset_limits(project).await,
            TeardownStep::RemoveQuotaProject => self.quota.remove_project(project).await,
            TeardownStep::PruneProjectsFile => self.journal.forget_project(project).await.map(drop),
            TeardownStep::PruneProjidFile => self.journal.forget_project_id(project).await.map(drop),
            TeardownStep::PruneMountTable => self.journal.forget_mount(path).await.map(drop),
            TeardownStep::RemoveDirectory => self.host.remove_tree(path).await,
            TeardownStep::ReleaseCapacity => {
                let capacity = capacity_of(volume)?;
                let remaining = self.ledger.increase(&self.node_name, &capacity).await?;
                debug!(volume = %volume.name, remaining = %remaining, "Released capacity");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventHandler<Volume> for VolumeLifecycleReconciler {
    async fn on_event(&self, event: VolumeEvent) {
        self.handle(event).await;
    }
}

/// Quota project name of a volume directory: its base name
fn project_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => {
            warn!(path = %path.display(), "Volume path has no base name");
            path.to_string_lossy().into_owned()
        }
    }
}

fn capacity_of(volume: &Volume) -> Result<StorageQuantity> {
    volume
        .capacity
        .as_deref()
        .ok_or_else(|| Error::CapacityParse(format!("volume {} has no storage capacity", volume.name)))
        .and_then(StorageQuantity::parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::MemoryStore;
    use crate::cluster::ObjectCache;
    use crate::config::{HostFiles, DEFAULT_PROVISIONER_NAME, LV_CAPACITY_RESOURCE};
    use crate::domain::ports::{HostVolumeOps, QuotaTool};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const CAP: &str = LV_CAPACITY_RESOURCE;
    const GI: u64 = 1 << 30;

    /// Host and quota fake sharing one call log
    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<String>>,
        fail_unmount: AtomicBool,
    }

    impl RecordingHost {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }
    }

    #[async_trait]
    impl HostVolumeOps for RecordingHost {
        async fn unmount(&self, path: &Path) -> Result<()> {
            if self.fail_unmount.load(Ordering::SeqCst) {
                return Err(Error::Syscall(nix::Error::EINVAL));
            }
            self.record(format!("unmount {}", path.display()));
            Ok(())
        }

        async fn remove_tree(&self, path: &Path) -> Result<()> {
            self.record(format!("remove {}", path.display()));
            Ok(())
        }

        async fn available_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(100 * GI)
        }
    }

    #[async_trait]
    impl QuotaTool for RecordingHost {
        async fn reset_limits(&self, project: &str) -> Result<()> {
            self.record(format!("limit {}", project));
            Ok(())
        }

        async fn remove_project(&self, project: &str) -> Result<()> {
            self.record(format!("project {}", project));
            Ok(())
        }
    }

    struct Fixture {
        _root: TempDir,
        files: HostFiles,
        store: Arc<MemoryStore>,
        host: Arc<RecordingHost>,
        reconciler: VolumeLifecycleReconciler,
    }

    const PROJECTS: &str = "7:/mnt/lv/pvc-0\n8:/mnt/lv/pvc-1\n";
    const PROJID: &str = "pvc-0:7\npvc-1:8\n";
    const FSTAB: &str = "/dev/sda1 / ext4 defaults 0 1\n/mnt/lv/pvc-1 /mnt/lv/pvc-1 none bind 0 0\n";

    fn fixture(mode: TeardownMode) -> Fixture {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        let files = HostFiles::under_root(root.path());
        std::fs::write(&files.projects, PROJECTS).unwrap();
        std::fs::write(&files.projid, PROJID).unwrap();
        std::fs::write(&files.mount_table, FSTAB).unwrap();

        let store = Arc::new(
            MemoryStore::new()
                .with_node("n2", &[("zone", "a")], &[(CAP, "200Gi")])
                .with_storage_class("sc-local", DEFAULT_PROVISIONER_NAME)
                .with_storage_class("sc-other", "example.com/other"),
        );
        let host = Arc::new(RecordingHost::default());
        let config = ProvisionerConfig {
            teardown_mode: mode,
            host_files: files.clone(),
            ..ProvisionerConfig::default()
        };
        let reconciler = VolumeLifecycleReconciler::new(
            "n2",
            &config,
            store.clone(),
            store.clone(),
            host.clone(),
            host.clone(),
            Arc::new(ProvisionerMetrics::new().unwrap()),
        );

        Fixture {
            _root: root,
            files,
            store,
            host,
            reconciler,
        }
    }

    fn volume(policy: ReclaimPolicy, node: &str) -> Volume {
        Volume {
            name: "v1".into(),
            storage_class: Some("sc-local".into()),
            reclaim_policy: policy,
            capacity: Some("20Gi".into()),
            local_path: Some("/mnt/lv/pvc-1".into()),
            node_affinity: Some(format!(
                r#"{{"nodeSelectorTerms":[{{"matchExpressions":[{{"key":"kubernetes.io/hostname","operator":"In","values":["{}"]}}]}}]}}"#,
                node
            )),
            phase: Some("Bound".into()),
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[tokio::test]
    async fn test_reserve_then_release_round_trip() {
        let f = fixture(TeardownMode::Full);
        let v1 = volume(ReclaimPolicy::Delete, "n2");

        assert_eq!(
            f.reconciler.handle(ObjectEvent::Added(v1.clone())).await,
            VolumeOutcome::Reserved
        );
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("180Gi"));

        assert_eq!(
            f.reconciler.handle(ObjectEvent::Deleted(v1)).await,
            VolumeOutcome::Released
        );
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("200Gi"));
        assert_eq!(
            f.host.calls(),
            vec![
                "unmount /mnt/lv/pvc-1",
                "limit pvc-1",
                "project pvc-1",
                "remove /mnt/lv/pvc-1",
            ]
        );
        assert_eq!(read(&f.files.projects), "7:/mnt/lv/pvc-0\n");
        assert_eq!(read(&f.files.projid), "pvc-0:7\n");
        assert_eq!(read(&f.files.mount_table), "/dev/sda1 / ext4 defaults 0 1\n");
    }

    #[tokio::test]
    async fn test_retained_volume_has_no_side_effects() {
        let f = fixture(TeardownMode::Full);

        let outcome = f
            .reconciler
            .handle(ObjectEvent::Deleted(volume(ReclaimPolicy::Retain, "n2")))
            .await;

        assert_eq!(outcome, VolumeOutcome::Retained);
        assert!(f.host.calls().is_empty());
        assert_eq!(f.store.node_writes(), 0);
        assert_eq!(read(&f.files.projects), PROJECTS);
        assert_eq!(read(&f.files.projid), PROJID);
        assert_eq!(read(&f.files.mount_table), FSTAB);
    }

    #[tokio::test]
    async fn test_unmount_failure_aborts_teardown() {
        let f = fixture(TeardownMode::Full);
        f.host.fail_unmount.store(true, Ordering::SeqCst);

        let v1 = volume(ReclaimPolicy::Delete, "n2");
        let err = f.reconciler.teardown(&v1).await.unwrap_err();
        assert!(matches!(err, Error::CleanupStepFailed { ref step, .. } if step == "unmount"));

        assert_eq!(
            f.reconciler.handle(ObjectEvent::Deleted(v1)).await,
            VolumeOutcome::Abandoned
        );
        assert!(f.host.calls().is_empty());
        assert_eq!(f.store.node_writes(), 0);
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("200Gi"));
        assert_eq!(read(&f.files.projects), PROJECTS);
        assert_eq!(read(&f.files.mount_table), FSTAB);
        assert_eq!(f.reconciler.metrics.teardown_failure_count("unmount"), 2);
    }

    #[tokio::test]
    async fn test_journal_failure_keeps_directory_and_capacity() {
        let f = fixture(TeardownMode::Full);
        std::fs::remove_file(&f.files.projid).unwrap();

        let outcome = f
            .reconciler
            .handle(ObjectEvent::Deleted(volume(ReclaimPolicy::Delete, "n2")))
            .await;

        assert_eq!(outcome, VolumeOutcome::Abandoned);
        assert_eq!(
            f.host.calls(),
            vec!["unmount /mnt/lv/pvc-1", "limit pvc-1", "project pvc-1"]
        );
        assert_eq!(read(&f.files.projects), "7:/mnt/lv/pvc-0\n");
        assert_eq!(read(&f.files.mount_table), FSTAB);
        assert_eq!(f.store.node_writes(), 0);
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("200Gi"));
        assert_eq!(
            f.reconciler.metrics.teardown_failure_count("prune-projid-file"),
            1
        );
    }

    #[tokio::test]
    async fn test_relist_does_not_reserve_twice() {
        let f = fixture(TeardownMode::Full);
        let v1 = volume(ReclaimPolicy::Delete, "n2");
        let mut cache = ObjectCache::new();

        for event in cache.restart(vec![v1.clone()]) {
            assert_eq!(f.reconciler.handle(event).await, VolumeOutcome::Reserved);
        }
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("180Gi"));

        for event in cache.restart(vec![v1.clone()]) {
            assert_eq!(f.reconciler.handle(event).await, VolumeOutcome::Ignored);
        }
        for event in cache.restart(vec![v1]) {
            f.reconciler.handle(event).await;
        }

        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("180Gi"));
        assert_eq!(f.store.node_writes(), 1);
    }

    #[tokio::test]
    async fn test_directory_only_mode() {
        let f = fixture(TeardownMode::DirectoryOnly);

        let outcome = f
            .reconciler
            .handle(ObjectEvent::Deleted(volume(ReclaimPolicy::Delete, "n2")))
            .await;

        assert_eq!(outcome, VolumeOutcome::Released);
        assert_eq!(f.host.calls(), vec!["remove /mnt/lv/pvc-1"]);
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("220Gi"));
        assert_eq!(read(&f.files.projects), PROJECTS);
    }

    #[tokio::test]
    async fn test_relevance_filter() {
        let f = fixture(TeardownMode::Full);

        let elsewhere = volume(ReclaimPolicy::Delete, "n7");
        assert!(!f.reconciler.is_relevant(&elsewhere).await);

        let mut foreign = volume(ReclaimPolicy::Delete, "n2");
        foreign.storage_class = Some("sc-other".into());
        assert!(!f.reconciler.is_relevant(&foreign).await);

        let mut unknown_class = volume(ReclaimPolicy::Delete, "n2");
        unknown_class.storage_class = Some("sc-missing".into());
        assert!(!f.reconciler.is_relevant(&unknown_class).await);

        let mut no_affinity = volume(ReclaimPolicy::Delete, "n2");
        no_affinity.node_affinity = None;
        assert!(!f.reconciler.is_relevant(&no_affinity).await);

        assert_eq!(
            f.reconciler.handle(ObjectEvent::Added(elsewhere.clone())).await,
            VolumeOutcome::Ignored
        );
        assert_eq!(
            f.reconciler.handle(ObjectEvent::Deleted(foreign)).await,
            VolumeOutcome::Ignored
        );
        assert!(f.host.calls().is_empty());
        assert_eq!(f.store.node_writes(), 0);
    }

    #[tokio::test]
    async fn test_updates_are_ignored() {
        let f = fixture(TeardownMode::Full);
        let v1 = volume(ReclaimPolicy::Delete, "n2");

        let outcome = f
            .reconciler
            .handle(ObjectEvent::Updated {
                old: v1.clone(),
                new: v1,
            })
            .await;

        assert_eq!(outcome, VolumeOutcome::Ignored);
        assert_eq!(f.store.node_writes(), 0);
    }

    #[tokio::test]
    async fn test_missing_capacity_abandons_reservation() {
        let f = fixture(TeardownMode::Full);
        let mut v1 = volume(ReclaimPolicy::Delete, "n2");
        v1.capacity = None;

        assert_eq!(
            f.reconciler.handle(ObjectEvent::Added(v1)).await,
            VolumeOutcome::Abandoned
        );
        assert_eq!(f.store.node_writes(), 0);
    }

    #[tokio::test]
    async fn test_initialize_capacity() {
        let f = fixture(TeardownMode::Full);

        let seeded = f.reconciler.initialize_capacity().await.unwrap();

        assert_eq!(seeded.to_string(), "100Gi");
        assert_eq!(f.store.capacity_of("n2", CAP).as_deref(), Some("100Gi"));
    }
}
