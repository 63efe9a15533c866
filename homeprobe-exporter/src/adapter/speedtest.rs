//! Speed test result adapter.
//!
//! The measurement itself is run out of process and leaves a flat JSON record
//! behind, e.g. `{"Download": "48,3 Mbit/s", "Ping": "14 ms", ...}`. This
//! adapter reads that record and classifies each measurement.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use homeprobe_common::MetricSet;

use super::{DeviceAdapter, numeric, record_labels};
use crate::config::{AdapterKind, ModuleSpec, TargetConfig};
use crate::error::ProbeError;
use crate::quality::QualityTable;

pub struct SpeedTestAdapter {
    quality: Arc<QualityTable>,
}

impl SpeedTestAdapter {
    pub fn new(quality: Arc<QualityTable>) -> Self {
        Self { quality }
    }
}

#[async_trait]
impl DeviceAdapter for SpeedTestAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::SpeedTest
    }

    async fn collect(
        &self,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let path = target
            .result_file
            .as_ref()
            .ok_or_else(|| ProbeError::unreachable(&target.id, "no result file configured"))?;

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProbeError::unreachable(&target.id, format!("{}: {}", path.display(), e))
        })?;
        let record: Value =
            serde_json::from_str(&content).map_err(|e| ProbeError::malformed(&target.id, e))?;
        if !record.is_object() {
            return Err(ProbeError::malformed(&target.id, "result is not an object"));
        }

        let labels = record_labels(&record, &module.labels);
        let mut set = MetricSet::new();
        let mut indicators = Vec::new();

        for spec in &module.metrics {
            let value = numeric(record.get(spec.field()));
            set.push(
                spec.sample(value, format!("Speed test result {}", spec.name))
                    .with_labels(&labels),
            );
            indicators.extend(self.quality.indicators(&spec.name, value, &labels));
        }
        set.extend(indicators);

        Ok(set)
    }
}
