//! Probe request dispatch.
//!
//! Resolves `target` and `module` query parameters against the registry,
//! collects the modules in request order and encodes each into its own block.
//! A failing module does not stop the others.

use std::sync::Arc;
use tracing::{debug, warn};

use homeprobe_common::encode;

use crate::error::ProbeError;
use crate::registry::TargetRegistry;
use crate::stats::SharedStats;

/// Parameters of a probe request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeQuery {
    /// First `target` value, if any.
    pub target: Option<String>,
    /// Every `module` value, in request order.
    pub modules: Vec<String>,
}

impl ProbeQuery {
    /// Parse a raw query string. Repeated `module` parameters are kept in
    /// order; empty values are ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut query = ProbeQuery::default();
        let Some(raw) = raw else {
            return query;
        };

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "target" if query.target.is_none() => query.target = Some(value.into_owned()),
                "module" => query.modules.push(value.into_owned()),
                _ => {}
            }
        }
        query
    }
}

/// Outcome of one requested module.
#[derive(Debug)]
pub struct ModuleReport {
    pub module: String,
    /// Encoded block on success.
    pub result: Result<String, ProbeError>,
}

/// Outcome of a probe request whose target resolved.
#[derive(Debug)]
pub struct ProbeReport {
    pub modules: Vec<ModuleReport>,
}

impl ProbeReport {
    pub fn any_succeeded(&self) -> bool {
        self.modules.iter().any(|m| m.result.is_ok())
    }

    /// Names of the modules that failed.
    pub fn failed_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|m| m.result.is_err())
            .map(|m| m.module.as_str())
            .collect()
    }

    pub fn first_error(&self) -> Option<&ProbeError> {
        self.modules.iter().find_map(|m| m.result.as_ref().err())
    }

    /// Successful blocks in request order, then one comment line per failed
    /// module.
    pub fn body(&self) -> String {
        let mut body = String::new();
        for block in self.modules.iter().filter_map(|m| m.result.as_ref().ok()) {
            body.push_str(block);
        }
        body.push_str(&self.error_lines("# "));
        body
    }

    /// One line per failed module, each starting with `prefix`.
    pub fn error_lines(&self, prefix: &str) -> String {
        let mut lines = String::new();
        for report in &self.modules {
            if let Err(e) = &report.result {
                let message = e.to_string().replace('\n', " ");
                lines.push_str(&format!(
                    "{}module \"{}\" failed: {}\n",
                    prefix, report.module, message
                ));
            }
        }
        lines
    }
}

/// Answers probe requests from the target registry.
pub struct Dispatcher {
    registry: Arc<TargetRegistry>,
    stats: SharedStats,
}

impl Dispatcher {
    pub fn new(registry: Arc<TargetRegistry>, stats: SharedStats) -> Self {
        Self { registry, stats }
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Resolve and collect a probe request.
    ///
    /// Request-level problems (missing target, unknown target, no module)
    /// are returned as errors; per-module failures end up in the report.
    pub async fn probe(&self, query: &ProbeQuery) -> Result<ProbeReport, ProbeError> {
        self.stats.record_request();

        let result = self.run(query).await;
        if let Err(e) = &result {
            warn!(target = ?query.target, error = %e, "Probe request rejected");
            self.stats.record_failure(e.kind());
        }
        result
    }

    async fn run(&self, query: &ProbeQuery) -> Result<ProbeReport, ProbeError> {
        let id = query
            .target
            .as_deref()
            .ok_or(ProbeError::MissingParameter("target"))?;
        let target = self.registry.target(id)?.clone();

        if query.modules.is_empty() {
            return Err(ProbeError::MissingParameter("module"));
        }

        let mut modules = Vec::with_capacity(query.modules.len());
        for module in &query.modules {
            let result = match self.registry.collect(&target, module).await {
                Ok(set) => encode(&set).map_err(ProbeError::from),
                Err(e) => Err(e),
            };

            match &result {
                Ok(block) => {
                    debug!(target = %target.id, module = %module, bytes = block.len(), "Module collected");
                    self.stats.record_success();
                }
                Err(e) => {
                    warn!(target = %target.id, module = %module, error = %e, "Module failed");
                    self.stats.record_failure(e.kind());
                }
            }

            modules.push(ModuleReport {
                module: module.clone(),
                result,
            });
        }

        Ok(ProbeReport { modules })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use crate::stats::ScrapeStats;

    #[test]
    fn test_parse_query() {
        let query = ProbeQuery::parse(Some(
            "target=192.168.1.1&module=system&module=interface&target=ignored",
        ));
        assert_eq!(query.target.as_deref(), Some("192.168.1.1"));
        assert_eq!(query.modules, vec!["system", "interface"]);
    }

    #[test]
    fn test_parse_query_encoded() {
        let query = ProbeQuery::parse(Some("target=10.0.0.5%3A8080&module=Status+SNS&module="));
        assert_eq!(query.target.as_deref(), Some("10.0.0.5:8080"));
        assert_eq!(query.modules, vec!["Status SNS"]);
    }

    #[test]
    fn test_parse_query_empty() {
        assert_eq!(ProbeQuery::parse(None), ProbeQuery::default());
        assert_eq!(ProbeQuery::parse(Some("")), ProbeQuery::default());
    }

    #[test]
    fn test_report_body() {
        let report = ProbeReport {
            modules: vec![
                ModuleReport {
                    module: "system".into(),
                    result: Ok("cpuload 7\n".into()),
                },
                ModuleReport {
                    module: "bogus".into(),
                    result: Err(ProbeError::UnknownModule {
                        target: "t".into(),
                        module: "bogus".into(),
                    }),
                },
            ],
        };

        assert!(report.any_succeeded());
        assert_eq!(report.failed_modules(), vec!["bogus"]);
        assert_eq!(
            report.body(),
            "cpuload 7\n# module \"bogus\" failed: Unknown module 'bogus' for target 't'\n"
        );
    }

    fn dispatcher() -> Dispatcher {
        let config = ExporterConfig::parse(
            r#"{
                targets: [{
                    id: "netztest",
                    kind: "speed_test",
                    result_file: "/nonexistent/homeprobe/result.json",
                    modules: [{ name: "netztest", metrics: ["download"] }],
                }],
            }"#,
        )
        .unwrap();
        let registry = Arc::new(TargetRegistry::from_config(&config).unwrap());
        Dispatcher::new(registry, Arc::new(ScrapeStats::new()))
    }

    #[tokio::test]
    async fn test_probe_validation_order() {
        let dispatcher = dispatcher();

        let err = dispatcher
            .probe(&ProbeQuery::parse(Some("module=netztest")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::MissingParameter("target")));

        let err = dispatcher
            .probe(&ProbeQuery::parse(Some("target=unknown")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::UnknownTarget(_)));

        let err = dispatcher
            .probe(&ProbeQuery::parse(Some("target=netztest")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::MissingParameter("module")));

        assert_eq!(dispatcher.stats().requests(), 3);
        assert_eq!(dispatcher.stats().failures("missing_parameter"), 2);
    }

    #[tokio::test]
    async fn test_probe_collects_failures_per_module() {
        let dispatcher = dispatcher();
        let report = dispatcher
            .probe(&ProbeQuery::parse(Some(
                "target=netztest&module=netztest&module=bogus",
            )))
            .await
            .unwrap();

        assert!(!report.any_succeeded());
        assert_eq!(report.failed_modules(), vec!["netztest", "bogus"]);
        assert!(matches!(
            report.first_error(),
            Some(ProbeError::BackendUnreachable { .. })
        ));
    }
}
