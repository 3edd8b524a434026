//! Node Picker
//!
//! Chooses the node with the most remaining local volume capacity among
//! the nodes matching a label selector. Label matching is delegated to
//! the object store.

use super::selector::SelectorExpression;
use crate::capacity::StorageQuantity;
use crate::domain::ports::{NodeRecord, NodeStoreRef};
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// Node with the largest positive ledger value, scanning in list order
///
/// Nodes without an entry (or with an unparseable one) are skipped, and a
/// node must advertise more than zero to be chosen. The comparison is
/// strict, so the first of several equal nodes is kept.
pub fn select_best<'a>(nodes: &'a [NodeRecord], resource: &str) -> Option<&'a NodeRecord> {
    let mut best: Option<&NodeRecord> = None;
    let mut max = StorageQuantity::ZERO;

    for node in nodes {
        let Some(raw) = node.capacity.get(resource) else {
            continue;
        };
        let capacity = match StorageQuantity::parse(raw) {
            Ok(capacity) => capacity,
            Err(e) => {
                warn!(node = %node.name, "Ignoring node with unreadable capacity: {}", e);
                continue;
            }
        };
        if capacity > max {
            max = capacity;
            best = Some(node);
        }
    }

    best
}

/// Capacity-aware node selection against the node store
pub struct NodePicker {
    store: NodeStoreRef,
    resource: String,
}

impl NodePicker {
    pub fn new(store: NodeStoreRef, resource: impl Into<String>) -> Self {
        Self {
            store,
            resource: resource.into(),
        }
    }

    /// Pick the best node for a selector
    ///
    /// A single match is returned even without a ledger entry so that
    /// single-node setups work before capacity has been published.
    pub async fn pick_best(&self, selector: &SelectorExpression) -> Result<NodeRecord> {
        let label_selector = selector.to_string();
        let mut nodes = self.store.list_nodes(&label_selector).await?;

        debug!(
            selector = %label_selector,
            candidates = nodes.len(),
            "Listed candidate nodes"
        );

        match nodes.len() {
            0 => Err(Error::NoNodesMatch {
                selector: label_selector,
            }),
            1 => Ok(nodes.remove(0)),
            _ => select_best(&nodes, &self.resource)
                .cloned()
                .ok_or(Error::NoCapacityAdvertised {
                    selector: label_selector,
                }),
        }
    }
}
