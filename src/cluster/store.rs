//! Kubernetes API adapter for the object store ports
//!
//! Capacity is written with a merge patch on the node status subresource
//! and assignments with a merge patch on claim annotations. A record that
//! carries a resource version sends it along, so the API server rejects
//! the write with 409 when the record is stale.

use super::convert::node_from;
use crate::domain::ports::{ClaimRequest, ClaimStore, NodeRecord, NodeStore, StorageClassStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Store ports backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
}

impl KubeStore {
    /// Every call is bounded by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn call<T, F>(&self, kind: &str, name: &str, verb: &str, request: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_api_error(e, kind, name)),
            Err(_) => Err(Error::Timeout {
                operation: format!("{} {}/{}", verb, kind, name),
            }),
        }
    }
}

/// Translate 404 and 409 answers into domain errors
fn map_api_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => Error::Kube(err),
    }
}

/// Merge patch body, guarded by `resource_version` when present
fn merge_patch(mut metadata: Value, resource_version: Option<&str>, status: Option<Value>) -> Value {
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = json!(rv);
    }
    let mut patch = json!({ "metadata": metadata });
    if let Some(status) = status {
        patch["status"] = status;
    }
    patch
}

#[async_trait]
impl NodeStore for KubeStore {
    async fn get_node(&self, name: &str) -> Result<NodeRecord> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = self.call("Node", name, "get", api.get(name)).await?;
        Ok(node_from(&node))
    }

    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<NodeRecord>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let params = if label_selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(label_selector)
        };
        let nodes = self
            .call("Node", label_selector, "list", api.list(&params))
            .await?;
        Ok(nodes.items.iter().map(node_from).collect())
    }

    async fn update_capacity(&self, node: &NodeRecord, resource: &str, value: &str) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = merge_patch(
            json!({}),
            node.resource_version.as_deref(),
            Some(json!({ "capacity": { resource: value } })),
        );
        self.call(
            "Node",
            &node.name,
            "patch status",
            api.patch_status(&node.name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;

        debug!(node = %node.name, resource, value, "Patched node capacity");
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for KubeStore {
    async fn annotate(&self, claim: &ClaimRequest, key: &str, value: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &claim.namespace);
        let patch = merge_patch(
            json!({ "annotations": { key: value } }),
            claim.resource_version.as_deref(),
            None,
        );
        self.call(
            "PersistentVolumeClaim",
            &claim.key(),
            "patch",
            api.patch(&claim.name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await?;

        debug!(claim = %claim.key(), key, value, "Patched claim annotation");
        Ok(())
    }
}

#[async_trait]
impl StorageClassStore for KubeStore {
    async fn provisioner_of(&self, storage_class: &str) -> Result<String> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let class = self
            .call("StorageClass", storage_class, "get", api.get(storage_class))
            .await?;
        Ok(class.provisioner)
    }
}
