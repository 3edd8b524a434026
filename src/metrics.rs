//! Provisioner Metrics
//!
//! Outcome counters for claim scheduling and volume handling, exported in
//! the Prometheus text format by the metrics endpoint.

use crate::error::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters shared by the scheduler and the volume reconciler
pub struct ProvisionerMetrics {
    registry: Registry,
    claims: IntCounterVec,
    volume_events: IntCounterVec,
    teardown_failures: IntCounterVec,
}

impl ProvisionerMetrics {
    /// Create counters in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let claims = IntCounterVec::new(
            Opts::new("lvp_claims_total", "Claim events by scheduling outcome"),
            &["outcome"],
        )?;
        let volume_events = IntCounterVec::new(
            Opts::new("lvp_volume_events_total", "Volume events by handling outcome"),
            &["outcome"],
        )?;
        let teardown_failures = IntCounterVec::new(
            Opts::new(
                "lvp_teardown_failures_total",
                "Volume teardowns abandoned, by failing step",
            ),
            &["step"],
        )?;

        registry.register(Box::new(claims.clone()))?;
        registry.register(Box::new(volume_events.clone()))?;
        registry.register(Box::new(teardown_failures.clone()))?;

        Ok(Self {
            registry,
            claims,
            volume_events,
            teardown_failures,
        })
    }

    pub fn record_claim(&self, outcome: &str) {
        self.claims.with_label_values(&[outcome]).inc();
    }

    pub fn record_volume(&self, outcome: &str) {
        self.volume_events.with_label_values(&[outcome]).inc();
    }

    pub fn record_teardown_failure(&self, step: &str) {
        self.teardown_failures.with_label_values(&[step]).inc();
    }

    pub fn claim_count(&self, outcome: &str) -> u64 {
        self.claims.with_label_values(&[outcome]).get()
    }

    pub fn volume_count(&self, outcome: &str) -> u64 {
        self.volume_events.with_label_values(&[outcome]).get()
    }

    pub fn teardown_failure_count(&self, step: &str) -> u64 {
        self.teardown_failures.with_label_values(&[step]).get()
    }

    /// Render all counters in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
