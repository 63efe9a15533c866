//! WiFi power socket adapter.

use async_trait::async_trait;
use std::time::Duration;

use homeprobe_common::{Labels, MetricSet};

use super::{DeviceAdapter, declared_samples, fetch_json, http_client};
use crate::config::{AdapterKind, ModuleSpec, TargetConfig};
use crate::error::ProbeError;

const COMMAND: &str = "status 0";

pub struct SocketAdapter {
    client: reqwest::Client,
}

impl SocketAdapter {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl DeviceAdapter for SocketAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Socket
    }

    async fn collect(
        &self,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let (user, password) = match &target.credentials {
            Some(c) => (c.username.as_str(), c.password.as_str()),
            None => ("", ""),
        };

        // The device only takes credentials in the query string.
        let request = self
            .client
            .get(format!("{}/cm", target.base_url()))
            .query(&[("user", user), ("password", password), ("cmnd", COMMAND)]);
        let status = fetch_json(&target.id, request).await?;

        let energy = status
            .get(&module.name)
            .and_then(|m| m.get("ENERGY"))
            .filter(|e| e.is_object())
            .ok_or_else(|| {
                ProbeError::malformed(&target.id, format!("missing {}.ENERGY", module.name))
            })?;

        Ok(declared_samples(energy, module, &Labels::new(), |name| {
            format!("WiFi socket metric {}", name)
        }))
    }
}
