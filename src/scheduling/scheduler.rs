//! Claim Scheduler
//!
//! Reacts to claim events, picks a node for every pending claim that belongs
//! to this provisioner and records the decision as a claim annotation. A
//! claim that already carries the annotation is never looked at again.

use super::picker::NodePicker;
use super::selector::SelectorResolver;
use crate::config::{DefaultSelectorTable, ProvisionerConfig, UpdatePolicy};
use crate::domain::events::{ClaimEvent, EventHandler, ObjectEvent};
use crate::domain::ports::{ClaimPhase, ClaimRequest, ClaimStoreRef, NodeStoreRef};
use crate::error::{Error, Result};
use crate::metrics::ProvisionerMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of handling one claim event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingOutcome {
    /// Not ours, already assigned, not pending, or a deletion
    Skipped,
    /// Claim annotated with the chosen node
    Assigned { node: String },
    /// Logged and left pending until the next delivery
    Abandoned,
}

impl SchedulingOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            SchedulingOutcome::Skipped => "skipped",
            SchedulingOutcome::Assigned { .. } => "assigned",
            SchedulingOutcome::Abandoned => "abandoned",
        }
    }
}

pub struct ClaimScheduler {
    provisioner_name: String,
    provisioner_annotation: String,
    node_name_annotation: String,
    update_policy: UpdatePolicy,
    resolver: SelectorResolver,
    picker: NodePicker,
    claims: ClaimStoreRef,
    metrics: Arc<ProvisionerMetrics>,
}

impl ClaimScheduler {
    pub fn new(
        config: &ProvisionerConfig,
        defaults: Arc<DefaultSelectorTable>,
        nodes: NodeStoreRef,
        claims: ClaimStoreRef,
        metrics: Arc<ProvisionerMetrics>,
    ) -> Self {
        Self {
            provisioner_name: config.provisioner_name.clone(),
            provisioner_annotation: config.provisioner_annotation.clone(),
            node_name_annotation: config.node_name_annotation.clone(),
            update_policy: config.update_policy,
            resolver: SelectorResolver::new(defaults, config.node_selector_annotation.clone()),
            picker: NodePicker::new(nodes, config.capacity_resource.clone()),
            claims,
            metrics,
        }
    }

    /// Admission filter: ours, unassigned and pending
    pub fn needs_scheduling(&self, claim: &ClaimRequest) -> bool {
        claim.annotation(&self.provisioner_annotation) == Some(self.provisioner_name.as_str())
            && claim.annotation(&self.node_name_annotation).is_none()
            && claim.phase == ClaimPhase::Pending
    }

    /// Handle one claim event; failures are logged here and never returned
    pub async fn handle(&self, event: ClaimEvent) -> SchedulingOutcome {
        let label = event.label();
        let claim = match event {
            ObjectEvent::Added(claim) | ObjectEvent::Updated { new: claim, .. } => claim,
            ObjectEvent::Deleted(claim) => {
                debug!(claim = %claim.key(), "Ignoring deleted claim");
                return self.finish(SchedulingOutcome::Skipped);
            }
        };

        if !self.needs_scheduling(&claim) {
            debug!(
                claim = %claim.key(),
                event = label,
                phase = %claim.phase,
                "Claim does not need scheduling"
            );
            return self.finish(SchedulingOutcome::Skipped);
        }

        let key = claim.key();
        let outcome = match self.schedule(claim).await {
            Ok(node) => SchedulingOutcome::Assigned { node },
            Err(e @ (Error::NoNodesMatch { .. } | Error::NoCapacityAdvertised { .. })) => {
                warn!(claim = %key, "Claim left pending: {}", e);
                SchedulingOutcome::Abandoned
            }
            Err(e) => {
                error!(claim = %key, "Failed to schedule claim: {}", e);
                SchedulingOutcome::Abandoned
            }
        };
        self.finish(outcome)
    }

    /// Resolve the selector, pick a node and commit the assignment
    pub async fn schedule(&self, mut claim: ClaimRequest) -> Result<String> {
        let selector = self.resolver.resolve(&claim)?;
        let node = self.picker.pick_best(&selector).await?;

        claim.resource_version = self.update_policy.resource_version(claim.resource_version.take());
        self.claims
            .annotate(&claim, &self.node_name_annotation, &node.name)
            .await
            .map_err(|e| Error::CommitFailed {
                claim: claim.key(),
                cause: e.to_string(),
            })?;

        info!(
            claim = %claim.key(),
            node = %node.name,
            selector = %selector,
            "Assigned claim to node"
        );
        Ok(node.name)
    }

    fn finish(&self, outcome: SchedulingOutcome) -> SchedulingOutcome {
        self.metrics.record_claim(outcome.label());
        outcome
    }
}

#[async_trait]
impl EventHandler<ClaimRequest> for ClaimScheduler {
    async fn on_event(&self, event: ClaimEvent) {
        self.handle(event).await;
    }
}
