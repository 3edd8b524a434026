//! Conversions from Kubernetes objects to domain records

use crate::domain::ports::{ClaimPhase, ClaimRequest, NodeRecord, ReclaimPolicy, Volume};
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::warn;

/// Capacity key of a persistent volume
const STORAGE: &str = "storage";

fn quantities(map: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    map.map(|m| m.iter().map(|(k, q)| (k.clone(), q.0.clone())).collect())
        .unwrap_or_default()
}

pub fn claim_from(pvc: &PersistentVolumeClaim) -> ClaimRequest {
    ClaimRequest {
        namespace: pvc.namespace().unwrap_or_default(),
        name: pvc.name_any(),
        storage_class: pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
        annotations: pvc.annotations().clone(),
        phase: ClaimPhase::from_api(pvc.status.as_ref().and_then(|s| s.phase.as_deref())),
        resource_version: pvc.resource_version(),
    }
}

/// The node affinity is kept as the JSON text of its required node selector
pub fn volume_from(pv: &PersistentVolume) -> Volume {
    let spec = pv.spec.as_ref();

    let node_affinity = spec
        .and_then(|s| s.node_affinity.as_ref())
        .and_then(|a| a.required.as_ref())
        .and_then(|required| match serde_json::to_string(required) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(volume = %pv.name_any(), "Cannot serialize node affinity: {}", e);
                None
            }
        });

    Volume {
        name: pv.name_any(),
        storage_class: spec.and_then(|s| s.storage_class_name.clone()),
        reclaim_policy: ReclaimPolicy::from_api(
            spec.and_then(|s| s.persistent_volume_reclaim_policy.as_deref()),
        ),
        capacity: spec
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get(STORAGE))
            .map(|q| q.0.clone()),
        local_path: spec.and_then(|s| s.local.as_ref()).map(|l| l.path.clone()),
        node_affinity,
        phase: pv.status.as_ref().and_then(|s| s.phase.clone()),
    }
}

pub fn node_from(node: &Node) -> NodeRecord {
    NodeRecord {
        name: node.name_any(),
        labels: node.labels().clone(),
        capacity: quantities(node.status.as_ref().and_then(|s| s.capacity.as_ref())),
        resource_version: node.resource_version(),
    }
}
