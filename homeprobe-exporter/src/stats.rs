//! Exporter self-metrics.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use homeprobe_common::{MetricKind, MetricSample, MetricSet};

/// Counters describing the probes served so far.
#[derive(Debug, Default)]
pub struct ScrapeStats {
    inner: RwLock<Counters>,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    requests: u64,
    modules_succeeded: u64,
    modules_failed: BTreeMap<&'static str, u64>,
}

pub type SharedStats = Arc<ScrapeStats>;

impl ScrapeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.inner.write().requests += 1;
    }

    pub fn record_success(&self) {
        self.inner.write().modules_succeeded += 1;
    }

    /// Count a failed module (or request) by error kind.
    pub fn record_failure(&self, kind: &'static str) {
        *self.inner.write().modules_failed.entry(kind).or_insert(0) += 1;
    }

    pub fn requests(&self) -> u64 {
        self.inner.read().requests
    }

    pub fn failures(&self, kind: &str) -> u64 {
        self.inner
            .read()
            .modules_failed
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    /// Current counters as samples.
    pub fn to_metric_set(&self) -> MetricSet {
        let counters = self.inner.read().clone();

        let mut set = MetricSet::new();
        set.push(
            MetricSample::new(
                "homeprobe_requests_total",
                "Probe requests received",
                counters.requests as f64,
            )
            .with_kind(MetricKind::Counter),
        );
        set.push(
            MetricSample::new(
                "homeprobe_module_success_total",
                "Modules collected successfully",
                counters.modules_succeeded as f64,
            )
            .with_kind(MetricKind::Counter),
        );
        for (kind, count) in &counters.modules_failed {
            set.push(
                MetricSample::new(
                    "homeprobe_module_failures_total",
                    "Failed probes by error kind",
                    *count as f64,
                )
                .with_kind(MetricKind::Counter)
                .with_label("kind", *kind),
            );
        }
        set
    }
}
