//! Configured targets and the adapter serving each device family.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use homeprobe_common::MetricSet;

use crate::adapter::{
    DeviceAdapter, InverterAdapter, LookupCache, PublicIpAdapter, RouterAdapter, SocketAdapter,
    SpeedTestAdapter,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AdapterKind, ConfigError, ExporterConfig, TargetConfig};
use crate::error::ProbeError;

/// Static mapping from target id to its configuration, plus one adapter per
/// device family. Built once at start-up.
pub struct TargetRegistry {
    targets: HashMap<String, Arc<TargetConfig>>,
    adapters: HashMap<AdapterKind, Arc<dyn DeviceAdapter>>,
}

impl TargetRegistry {
    pub fn from_config(config: &ExporterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the registry with a specific clock for the lookup cache.
    pub fn with_clock(config: &ExporterConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let timeout = config.http.timeout();
        let quality = Arc::new(config.quality_table()?);
        let cache = Arc::new(LookupCache::new(Duration::from_secs(
            config.http.cache_ttl_secs,
        )));

        let lookups = config
            .targets
            .iter()
            .filter(|t| t.kind == AdapterKind::PublicIp)
            .count();
        if lookups > 1 {
            warn!(
                count = lookups,
                "Several public_ip targets share one lookup cache"
            );
        }

        let adapters: Vec<Arc<dyn DeviceAdapter>> = vec![
            Arc::new(InverterAdapter::new(timeout)?),
            Arc::new(SocketAdapter::new(timeout)?),
            Arc::new(RouterAdapter::new(&config.targets, timeout)?),
            Arc::new(PublicIpAdapter::new(
                config.http.lookup_timeout(),
                cache,
                clock,
            )?),
            Arc::new(SpeedTestAdapter::new(quality)),
        ];
        let adapters = adapters.into_iter().map(|a| (a.kind(), a)).collect();

        let targets: HashMap<String, Arc<TargetConfig>> = config
            .targets
            .iter()
            .map(|t| (t.id.clone(), Arc::new(t.clone())))
            .collect();

        info!(targets = targets.len(), "Target registry ready");
        Ok(Self { targets, adapters })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Look up a target by id.
    pub fn target(&self, id: &str) -> Result<&Arc<TargetConfig>, ProbeError> {
        self.targets
            .get(id)
            .ok_or_else(|| ProbeError::UnknownTarget(id.to_string()))
    }

    /// Collect one module of a target through the adapter for its kind.
    pub async fn collect(
        &self,
        target: &TargetConfig,
        module: &str,
    ) -> Result<MetricSet, ProbeError> {
        let spec = target
            .module(module)
            .ok_or_else(|| ProbeError::UnknownModule {
                target: target.id.clone(),
                module: module.to_string(),
            })?;

        let adapter = self
            .adapters
            .get(&target.kind)
            .ok_or_else(|| ProbeError::UnknownTarget(target.id.clone()))?;

        adapter.collect(target, spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExporterConfig {
        ExporterConfig::parse(
            r#"{
                targets: [
                    { id: "10.0.0.20", kind: "inverter", modules: [{ name: "GetPowerFlowRealtimeData" }] },
                    {
                        id: "10.0.0.1",
                        kind: "router",
                        credentials: { username: "admin", password: "pw" },
                        modules: [{ name: "system" }],
                    },
                ],
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TargetRegistry::from_config(&config()).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.target("10.0.0.1").unwrap().kind, AdapterKind::Router);
        assert!(matches!(
            registry.target("10.0.0.99"),
            Err(ProbeError::UnknownTarget(_))
        ));
        assert_eq!(registry.adapters.len(), 5);
    }

    #[tokio::test]
    async fn test_collect_unknown_module() {
        let registry = TargetRegistry::from_config(&config()).unwrap();
        let target = registry.target("10.0.0.1").unwrap().clone();

        let err = registry.collect(&target, "interface").await.unwrap_err();
        assert!(matches!(err, ProbeError::UnknownModule { .. }));
    }
}
