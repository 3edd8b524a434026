//! Local Volume Provisioner - Capacity-Aware Node Placement
//!
//! Places pending volume claims on the node with the most remaining local
//! storage and keeps a per-node capacity ledger on the node status. A
//! node-local agent reserves capacity when volumes bind and tears volume
//! directories down when they are deleted.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      Watch Feeds (kube-runtime)                    │
//! │        claims ──► ObjectCache ──┐     volumes ──► ObjectCache ──┐  │
//! ├─────────────────────────────────┼───────────────────────────────┼──┤
//! │  ┌──────────────────────────────▼──┐  ┌─────────────────────────▼┐ │
//! │  │         ClaimScheduler          │  │ VolumeLifecycleReconciler│ │
//! │  │  SelectorResolver, NodePicker   │  │  teardown, QuotaJournal  │ │
//! │  └────────────────┬────────────────┘  └────────────┬─────────────┘ │
//! │                   └──────────┬──────────────────────┘              │
//! │                    ┌─────────▼─────────┐                           │
//! │                    │  CapacityLedger   │                           │
//! │                    │ (node status map) │                           │
//! │                    └───────────────────┘                           │
//! ├───────────────────────────────────────────────────────────────────┤
//! │   KubeStore (kube Api)   │   LocalHost (nix)   │  XfsQuota        │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`capacity`]: Exact storage quantities and the capacity ledger
//! - [`scheduling`]: Selector resolution, node picking, claim scheduling
//! - [`lifecycle`]: Volume reservation and teardown on the local node
//! - [`cluster`]: Kubernetes adapters and watch feeds
//! - [`host`]: Host filesystem and quota adapters
//! - [`domain`]: Core records, events and port traits
//! - [`config`]: Runtime configuration and the default selector table
//! - [`error`]: Error types and handling

pub mod capacity;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod metrics;
pub mod scheduling;

// Re-export commonly used types
pub use capacity::{CapacityLedger, QuantityFormat, StorageQuantity};

pub use cluster::{KubeStore, ObjectCache, WatchFeed};

pub use config::{
    DefaultSelectorTable, HostFiles, ProvisionerConfig, RunMode, TeardownMode, UpdatePolicy,
};

pub use domain::events::{ClaimEvent, EventHandler, ObjectEvent, VolumeEvent};
pub use domain::ports::{
    ClaimPhase, ClaimRequest, ClaimStore, HostVolumeOps, NodeRecord, NodeStore, QuotaTool,
    ReclaimPolicy, StorageClassStore, Volume,
};

pub use error::{Error, ErrorAction, Result};

pub use host::{LocalHost, XfsQuota};

pub use lifecycle::{QuotaJournal, TeardownStep, VolumeLifecycleReconciler, VolumeOutcome};

pub use metrics::ProvisionerMetrics;

pub use scheduling::{ClaimScheduler, NodePicker, SchedulingOutcome, SelectorExpression, SelectorResolver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
