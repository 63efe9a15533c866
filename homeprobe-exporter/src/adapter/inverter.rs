//! Solar inverter adapter.
//!
//! Reads the realtime power flow of a site controller and of every configured
//! subsystem, aggregates photovoltaic output and derives grid flows.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use homeprobe_common::{Labels, MetricSample, MetricSet};

use super::{DeviceAdapter, fetch_json, http_client, numeric};
use crate::config::{AdapterKind, ModuleSpec, TargetConfig};
use crate::error::ProbeError;

/// The only module inverters answer to.
pub const INVERTER_MODULE: &str = "GetPowerFlowRealtimeData";

/// Metrics computed by the adapter rather than read from the device.
pub const DERIVED_METRICS: [&str; 3] = ["P_fromGrid", "P_toGrid", "P_Usage"];

const ENDPOINT: &str = "/solar_api/v1/GetPowerFlowRealtimeData.fcgi";

/// Power drawn from and fed into the grid, split by sign of `P_Grid`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFlows {
    pub from_grid: f64,
    pub to_grid: f64,
    pub usage: f64,
}

impl GridFlows {
    /// Negative grid power is export. Usage is always `pv + grid`.
    pub fn new(pv: f64, grid: f64) -> Self {
        let (from_grid, to_grid) = if grid < 0.0 { (0.0, -grid) } else { (grid, 0.0) };
        Self {
            from_grid,
            to_grid,
            usage: pv + grid,
        }
    }
}

pub struct InverterAdapter {
    client: reqwest::Client,
}

impl InverterAdapter {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }

    async fn site(&self, host: &str) -> Result<Map<String, Value>, ProbeError> {
        let url = format!("http://{}{}", host, ENDPOINT);
        let body = fetch_json(host, self.client.get(&url)).await?;

        body.pointer("/Body/Data/Site")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| ProbeError::malformed(host, "missing Body.Data.Site"))
    }
}

#[async_trait]
impl DeviceAdapter for InverterAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Inverter
    }

    async fn collect(
        &self,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let site = self.site(&target.id).await?;
        let own_pv = numeric(site.get("P_PV"));

        let mut total_pv = own_pv;
        let mut degraded = false;
        let mut subsystems = Vec::with_capacity(target.subsystems.len());

        for (index, host) in target.subsystems.iter().enumerate() {
            let n = index + 1;
            match self.site(host).await {
                Ok(sub) => {
                    let pv = numeric(sub.get("P_PV"));
                    total_pv += pv;
                    subsystems.push(
                        MetricSample::new(
                            format!("P_PV_{}", n),
                            format!("subsystem {} power output", n),
                            pv,
                        )
                        .with_label("system", format!("subsystem-{}", n)),
                    );
                }
                Err(e) => {
                    warn!(target = %target.id, subsystem = %host, error = %e, "Subsystem request failed");
                    degraded = true;
                }
            }
        }

        let mut primary = Labels::new();
        if degraded {
            primary.insert("error", "requestError");
        }

        let mut set = MetricSet::new();
        set.push(
            MetricSample::new("P_PV_0", "site controller power output", own_pv)
                .with_label("system", "controller")
                .with_labels(&primary),
        );
        set.extend(subsystems);

        for spec in &module.metrics {
            let value = if spec.field() == "P_PV" {
                total_pv
            } else {
                numeric(site.get(spec.field()))
            };
            set.push(
                spec.sample(value, format!("site metric {}", spec.name))
                    .with_labels(&primary),
            );
        }

        let flows = GridFlows::new(total_pv, numeric(site.get("P_Grid")));
        let derived = [
            ("P_fromGrid", "power drawn from the grid", flows.from_grid),
            ("P_toGrid", "power fed into the grid", flows.to_grid),
            ("P_Usage", "power used on site", flows.usage),
        ];
        for (name, help, value) in derived {
            set.push(MetricSample::new(name, help, value).with_labels(&primary));
        }

        debug!(target = %target.id, samples = set.len(), total_pv, "Collected power flow");
        Ok(set)
    }
}
