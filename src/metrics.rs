//! Provisioning metrics
//!
//! Counters and histograms for LUN provisioning, kept in a dedicated
//! Prometheus registry that the metrics server encodes on scrape.

use crate::domain::ports::BackendKind;
use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics recorded by the orchestrator
pub struct ProvisionerMetrics {
    registry: Registry,
    provisions: IntCounterVec,
    provision_duration: HistogramVec,
    deletions: IntCounterVec,
    rollbacks: IntCounterVec,
    acl_failures: IntCounter,
}

fn registration(e: prometheus::Error) -> Error {
    Error::Internal(format!("metric registration failed: {}", e))
}

impl ProvisionerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let provisions = IntCounterVec::new(
            Opts::new("lun_provisions_total", "LUN create attempts by backend and outcome"),
            &["backend", "outcome"],
        )
        .map_err(registration)?;
        let provision_duration = HistogramVec::new(
            HistogramOpts::new(
                "lun_provision_duration_seconds",
                "Duration of LUN create operations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["backend"],
        )
        .map_err(registration)?;
        let deletions = IntCounterVec::new(
            Opts::new("lun_deletions_total", "LUN delete attempts by outcome"),
            &["outcome"],
        )
        .map_err(registration)?;
        let rollbacks = IntCounterVec::new(
            Opts::new(
                "lun_rollbacks_total",
                "Provisioning rollbacks by whether every compensation succeeded",
            ),
            &["outcome"],
        )
        .map_err(registration)?;
        let acl_failures = IntCounter::new(
            "lun_acl_failures_total",
            "Initiator grants that failed after a LUN was bound",
        )
        .map_err(registration)?;

        registry.register(Box::new(provisions.clone())).map_err(registration)?;
        registry
            .register(Box::new(provision_duration.clone()))
            .map_err(registration)?;
        registry.register(Box::new(deletions.clone())).map_err(registration)?;
        registry.register(Box::new(rollbacks.clone())).map_err(registration)?;
        registry.register(Box::new(acl_failures.clone())).map_err(registration)?;

        Ok(Self {
            registry,
            provisions,
            provision_duration,
            deletions,
            rollbacks,
            acl_failures,
        })
    }

    pub fn record_provision(&self, kind: BackendKind, success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.provisions
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
        self.provision_duration
            .with_label_values(&[kind.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_deletion(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.deletions.with_label_values(&[outcome]).inc();
    }

    pub fn record_rollback(&self, complete: bool) {
        let outcome = if complete { "complete" } else { "incomplete" };
        self.rollbacks.with_label_values(&[outcome]).inc();
    }

    pub fn record_acl_failure(&self) {
        self.acl_failures.inc();
    }

    /// Provisions counted for a backend and outcome
    pub fn provisions(&self, kind: BackendKind, outcome: &str) -> u64 {
        self.provisions
            .with_label_values(&[kind.as_str(), outcome])
            .get()
    }

    /// Rollbacks counted for an outcome (`complete` or `incomplete`)
    pub fn rollbacks(&self, outcome: &str) -> u64 {
        self.rollbacks.with_label_values(&[outcome]).get()
    }

    pub fn acl_failures(&self) -> u64 {
        self.acl_failures.get()
    }

    /// Encode the registry in the text exposition format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metric encoding failed: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}
