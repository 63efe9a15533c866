//! Device adapters.
//!
//! Every device family implements [`DeviceAdapter`]. The registry keeps one
//! adapter per [`AdapterKind`] and hands it the target and module to collect.

pub mod inverter;
pub mod public_ip;
pub mod router;
pub mod socket;
pub mod speedtest;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use homeprobe_common::{Labels, MetricSet};

use crate::config::{AdapterKind, LabelSpec, ModuleSpec, TargetConfig};
use crate::error::ProbeError;

pub use inverter::InverterAdapter;
pub use public_ip::{CachedLookup, LookupCache, PublicIpAdapter};
pub use router::RouterAdapter;
pub use socket::SocketAdapter;
pub use speedtest::SpeedTestAdapter;

/// Collects one module from one kind of device.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Device family served by this adapter.
    fn kind(&self) -> AdapterKind;

    /// Query the device and normalize the answer into samples.
    async fn collect(
        &self,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError>;
}

/// Build an HTTP client with a request timeout.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("homeprobe/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// GET a URL and parse the body as JSON.
///
/// Transport failures and non-2xx answers are `BackendUnreachable`; a body
/// that is not JSON is `MalformedUpstreamResponse`.
pub(crate) async fn fetch_json(
    target: &str,
    request: reqwest::RequestBuilder,
) -> Result<Value, ProbeError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProbeError::unreachable(target, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::unreachable(target, format!("HTTP {}", status)));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProbeError::unreachable(target, e))?;

    serde_json::from_str(&body).map_err(|e| ProbeError::malformed(target, e))
}

/// Coerce an upstream value to a number.
///
/// Absent and null read as 0, booleans as 0/1. Strings are parsed from their
/// first whitespace-separated token with `,` as decimal separator, so
/// `"12,5 Mbit/s"` reads as 12.5. Anything else reads as 0.
pub fn numeric(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Some(Value::String(s)) => s
            .split_whitespace()
            .next()
            .and_then(|token| token.replace(',', ".").parse::<f64>().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Render a scalar as a label value. Null, arrays and objects have none.
pub fn label_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Copy the declared label fields of a record. Fields the record lacks are
/// left out.
pub fn record_labels(record: &Value, specs: &[LabelSpec]) -> Labels {
    let mut labels = Labels::new();
    for spec in specs {
        if let Some(value) = record.get(spec.field()).and_then(label_value) {
            labels.insert(spec.key(), value);
        }
    }
    labels
}

/// Emit every declared metric of a module from a flat record.
pub fn declared_samples(
    record: &Value,
    module: &ModuleSpec,
    labels: &Labels,
    default_help: impl Fn(&str) -> String,
) -> MetricSet {
    module
        .metrics
        .iter()
        .map(|spec| {
            spec.sample(numeric(record.get(spec.field())), default_help(&spec.name))
                .with_labels(labels)
        })
        .collect()
}
