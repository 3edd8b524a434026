//! Capacity Ledger
//!
//! Remaining local volume capacity is kept as a status capacity entry on
//! each node. Every adjustment re-fetches the node, applies exact signed
//! arithmetic and writes the single entry back through the status
//! subresource. Nothing is cached between calls.

use super::quantity::StorageQuantity;
use crate::config::{ProvisionerConfig, UpdatePolicy};
use crate::domain::ports::{NodeRecord, NodeStoreRef};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Increase,
    Decrease,
}

/// Per-node capacity ledger backed by the node store
pub struct CapacityLedger {
    store: NodeStoreRef,
    resource: String,
    policy: UpdatePolicy,
}

impl CapacityLedger {
    /// Create a ledger writing the given status capacity entry
    pub fn new(store: NodeStoreRef, resource: impl Into<String>, policy: UpdatePolicy) -> Self {
        Self {
            store,
            resource: resource.into(),
            policy,
        }
    }

    pub fn from_config(store: NodeStoreRef, config: &ProvisionerConfig) -> Self {
        Self::new(store, config.capacity_resource.clone(), config.update_policy)
    }

    /// Name of the capacity entry
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Parse a node's ledger entry, if it has one
    pub fn entry_of(&self, node: &NodeRecord) -> Result<Option<StorageQuantity>> {
        node.capacity
            .get(&self.resource)
            .map(|raw| StorageQuantity::parse(raw))
            .transpose()
    }

    /// Current ledger value of a node
    pub async fn read(&self, node_name: &str) -> Result<Option<StorageQuantity>> {
        let node = self
            .store
            .get_node(node_name)
            .await
            .map_err(|e| failed(node_name, e))?;
        self.entry_of(&node).map_err(|e| failed(node_name, e))
    }

    /// Seed a node's ledger with the bytes available on its storage filesystem
    pub async fn initialize(&self, node_name: &str, available_bytes: u64) -> Result<StorageQuantity> {
        let node = self
            .store
            .get_node(node_name)
            .await
            .map_err(|e| failed(node_name, e))?;
        let value = StorageQuantity::from_bytes(available_bytes);
        self.write(node, &value).await?;

        info!(node = %node_name, capacity = %value, "Initialized local volume capacity");
        Ok(value)
    }

    /// Add capacity back to a node; a missing entry counts as zero
    pub async fn increase(&self, node_name: &str, quantity: &StorageQuantity) -> Result<StorageQuantity> {
        self.adjust(node_name, quantity, Adjustment::Increase).await
    }

    /// Take capacity away from a node; the node must already carry an entry
    pub async fn decrease(&self, node_name: &str, quantity: &StorageQuantity) -> Result<StorageQuantity> {
        self.adjust(node_name, quantity, Adjustment::Decrease).await
    }

    async fn adjust(
        &self,
        node_name: &str,
        quantity: &StorageQuantity,
        adjustment: Adjustment,
    ) -> Result<StorageQuantity> {
        let node = self
            .store
            .get_node(node_name)
            .await
            .map_err(|e| failed(node_name, e))?;

        let current = match self.entry_of(&node).map_err(|e| failed(node_name, e))? {
            Some(current) => current,
            None if adjustment == Adjustment::Increase => StorageQuantity::ZERO,
            None => {
                return Err(Error::NodeCapacityMissing {
                    node: node_name.to_string(),
                })
            }
        };

        let updated = match adjustment {
            Adjustment::Increase => current.checked_add(quantity),
            Adjustment::Decrease => current.checked_sub(quantity),
        }
        .map_err(|e| failed(node_name, e))?;

        self.write(node, &updated).await?;

        debug!(
            node = %node_name,
            before = %current,
            after = %updated,
            "Adjusted local volume capacity"
        );
        Ok(updated)
    }

    async fn write(&self, mut node: NodeRecord, value: &StorageQuantity) -> Result<()> {
        node.resource_version = self.policy.resource_version(node.resource_version.take());
        self.store
            .update_capacity(&node, &self.resource, &value.to_string())
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    warn!(node = %node.name, "Capacity update lost a race with another writer");
                }
                failed(&node.name, e)
            })
    }
}

fn failed(node: &str, cause: Error) -> Error {
    Error::LedgerUpdateFailed {
        node: node.to_string(),
        cause: cause.to_string(),
    }
}
