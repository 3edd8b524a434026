//! In-memory object store used by the unit tests
//!
//! Behaves like the API server where it matters to the components: label
//! selection, resource-version bumps, 409-style conflicts and injectable
//! write failures.

use crate::domain::ports::{ClaimRequest, ClaimStore, NodeRecord, NodeStore, StorageClassStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct MemoryStore {
    /// Insertion order is list order
    nodes: RwLock<Vec<NodeRecord>>,
    claims: RwLock<BTreeMap<String, ClaimRequest>>,
    storage_classes: RwLock<BTreeMap<String, String>>,
    fail_node_writes: AtomicBool,
    fail_claim_writes: AtomicBool,
    node_writes: AtomicU64,
    claim_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, name: &str, labels: &[(&str, &str)], capacity: &[(&str, &str)]) -> Self {
        self.nodes.write().push(NodeRecord {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            capacity: capacity
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            resource_version: Some("1".into()),
        });
        self
    }

    pub fn with_storage_class(self, name: &str, provisioner: &str) -> Self {
        self.storage_classes
            .write()
            .insert(name.to_string(), provisioner.to_string());
        self
    }

    pub fn with_claim(self, claim: ClaimRequest) -> Self {
        self.claims.write().insert(claim.key(), claim);
        self
    }

    pub fn node(&self, name: &str) -> Option<NodeRecord> {
        self.nodes.read().iter().find(|n| n.name == name).cloned()
    }

    pub fn capacity_of(&self, node: &str, resource: &str) -> Option<String> {
        self.node(node).and_then(|n| n.capacity.get(resource).cloned())
    }

    pub fn claim(&self, key: &str) -> Option<ClaimRequest> {
        self.claims.read().get(key).cloned()
    }

    /// Simulate another writer touching a node
    pub fn touch_node(&self, name: &str) {
        if let Some(node) = self.nodes.write().iter_mut().find(|n| n.name == name) {
            bump(&mut node.resource_version);
        }
    }

    pub fn fail_node_writes(&self, fail: bool) {
        self.fail_node_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_claim_writes(&self, fail: bool) {
        self.fail_claim_writes.store(fail, Ordering::SeqCst);
    }

    pub fn node_writes(&self) -> u64 {
        self.node_writes.load(Ordering::SeqCst)
    }

    pub fn claim_writes(&self) -> u64 {
        self.claim_writes.load(Ordering::SeqCst)
    }
}

fn bump(resource_version: &mut Option<String>) {
    let next = resource_version
        .as_deref()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    *resource_version = Some(next.to_string());
}

fn check_version(kind: &str, name: &str, sent: &Option<String>, stored: &Option<String>) -> Result<()> {
    match sent {
        Some(rv) if Some(rv) != stored.as_ref() => Err(Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        _ => Ok(()),
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get_node(&self, name: &str) -> Result<NodeRecord> {
        self.node(name).ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".into(),
            name: name.to_string(),
        })
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeRecord>> {
        Ok(self
            .nodes
            .read()
            .iter()
            .filter(|n| matches_selector(&n.labels, label_selector))
            .cloned()
            .collect())
    }

    async fn update_capacity(&self, node: &NodeRecord, resource: &str, value: &str) -> Result<()> {
        if self.fail_node_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("injected node write failure".into()));
        }
        let mut nodes = self.nodes.write();
        let stored = nodes
            .iter_mut()
            .find(|n| n.name == node.name)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Node".into(),
                name: node.name.clone(),
            })?;
        check_version("Node", &node.name, &node.resource_version, &stored.resource_version)?;
        stored.capacity.insert(resource.to_string(), value.to_string());
        bump(&mut stored.resource_version);
        self.node_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn annotate(&self, claim: &ClaimRequest, key: &str, value: &str) -> Result<()> {
        if self.fail_claim_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("injected claim write failure".into()));
        }
        let mut claims = self.claims.write();
        let stored = claims.get_mut(&claim.key()).ok_or_else(|| Error::ResourceNotFound {
            kind: "PersistentVolumeClaim".into(),
            name: claim.key(),
        })?;
        check_version(
            "PersistentVolumeClaim",
            &claim.key(),
            &claim.resource_version,
            &stored.resource_version,
        )?;
        stored.annotations.insert(key.to_string(), value.to_string());
        bump(&mut stored.resource_version);
        self.claim_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StorageClassStore for MemoryStore {
    async fn provisioner_of(&self, storage_class: &str) -> Result<String> {
        self.storage_classes
            .read()
            .get(storage_class)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "StorageClass".into(),
                name: storage_class.to_string(),
            })
    }
}
