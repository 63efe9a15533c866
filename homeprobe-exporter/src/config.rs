//! Configuration for the exporter.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use homeprobe_common::{
    LoggingConfig, MetricKind, MetricSample, is_valid_label_name, is_valid_metric_name,
    sanitize_label_name,
};

use crate::adapter::inverter::{DERIVED_METRICS, INVERTER_MODULE};
use crate::adapter::router::ROUTER_MODULES;
use crate::quality::{BucketConfig, INDICATOR_LABELS, QualityError, QualityTable};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid quality thresholds: {0}")]
    Quality(#[from] QualityError),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream request settings.
    #[serde(default)]
    pub http: UpstreamConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Quality threshold tables, keyed by metric name.
    #[serde(default)]
    pub quality: HashMap<String, Vec<BucketConfig>>,

    /// Probe targets.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Serve exporter self-metrics on `/metrics`.
    #[serde(default)]
    pub self_metrics: bool,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            self_metrics: false,
        }
    }
}

/// Timeouts and cache lifetime for upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Timeout for device requests in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for public address lookups in seconds.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// How long a public address lookup stays valid (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_lookup_timeout() -> u64 {
    30
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            lookup_timeout_secs: default_lookup_timeout(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

/// Device family a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Solar inverter with optional subsystems.
    Inverter,
    /// WiFi power socket.
    Socket,
    /// Router with challenge-response login.
    Router,
    /// Public address lookup service.
    PublicIp,
    /// Speed test result record.
    SpeedTest,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Inverter => "inverter",
            AdapterKind::Socket => "socket",
            AdapterKind::Router => "router",
            AdapterKind::PublicIp => "public_ip",
            AdapterKind::SpeedTest => "speed_test",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Login credentials for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Configuration for a single probe target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target identifier, the device host or IP (optionally with port).
    pub id: String,

    /// Device family.
    pub kind: AdapterKind,

    /// Credentials (router and socket targets).
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Additional inverters aggregated into this one, in order.
    #[serde(default)]
    pub subsystems: Vec<String>,

    /// Lookup URL template (public address targets). `$token` / `${token}`
    /// is replaced by `token`.
    #[serde(default)]
    pub url: Option<String>,

    /// Token substituted into `url`.
    #[serde(default)]
    pub token: Option<String>,

    /// Result record written by the speed test runner.
    #[serde(default)]
    pub result_file: Option<PathBuf>,

    /// Modules this target answers to.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl TargetConfig {
    /// Find a module declaration by name.
    pub fn module(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Base URL of the device.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.id)
    }
}

/// Declaration of the fields a module exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Module name as requested in the `module` query parameter.
    pub name: String,

    /// Exposed metrics, in output order.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,

    /// Upstream fields copied into labels.
    #[serde(default)]
    pub labels: Vec<LabelSpec>,
}

/// A declared metric: either a bare field name or a full declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MetricSpecRepr")]
pub struct MetricSpec {
    /// Metric name.
    pub name: String,

    /// Upstream field to read (defaults to `name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Help text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Metric type (default: untyped).
    #[serde(default, rename = "type")]
    pub kind: MetricKind,

    /// Unit name, e.g. "volt".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Unit symbol, e.g. "V".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_symbol: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetricSpecRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default, rename = "type", alias = "metrictype")]
        kind: MetricKind,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default, alias = "unitsymbol")]
        unit_symbol: Option<String>,
    },
}

impl From<MetricSpecRepr> for MetricSpec {
    fn from(repr: MetricSpecRepr) -> Self {
        match repr {
            MetricSpecRepr::Name(name) => MetricSpec::named(name),
            MetricSpecRepr::Full {
                name,
                field,
                description,
                kind,
                unit,
                unit_symbol,
            } => MetricSpec {
                name,
                field,
                description,
                kind,
                unit,
                unit_symbol,
            },
        }
    }
}

impl MetricSpec {
    /// A bare declaration: untyped, no unit, field = name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: None,
            description: None,
            kind: MetricKind::Untyped,
            unit: None,
            unit_symbol: None,
        }
    }

    /// Upstream field name.
    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }

    /// Effective unit: `unit_symbol` joined when both parts are set.
    pub fn unit(&self) -> Option<String> {
        let unit = self.unit.as_deref().filter(|u| !u.is_empty());
        let symbol = self.unit_symbol.as_deref().filter(|s| !s.is_empty());
        match (unit, symbol) {
            (Some(u), Some(s)) => Some(format!("{}_{}", u, s)),
            (Some(u), None) => Some(u.to_string()),
            (None, Some(s)) => Some(s.to_string()),
            (None, None) => None,
        }
    }

    /// Build a sample carrying this declaration's metadata.
    pub fn sample(&self, value: f64, default_help: impl Into<String>) -> MetricSample {
        let help = match &self.description {
            Some(d) => d.clone(),
            None => default_help.into(),
        };
        MetricSample::new(&self.name, help, value)
            .with_kind(self.kind)
            .with_unit(self.unit())
    }
}

/// A declared label: a bare field name or `{ name, field }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LabelSpecRepr")]
pub struct LabelSpec {
    /// Label name (sanitized when emitted).
    pub name: String,
    /// Upstream field to read (defaults to `name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LabelSpecRepr {
    Name(String),
    Mapped {
        name: String,
        #[serde(default)]
        field: Option<String>,
    },
}

impl From<LabelSpecRepr> for LabelSpec {
    fn from(repr: LabelSpecRepr) -> Self {
        match repr {
            LabelSpecRepr::Name(name) => LabelSpec { name, field: None },
            LabelSpecRepr::Mapped { name, field } => LabelSpec { name, field },
        }
    }
}

impl LabelSpec {
    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }

    /// Label key as emitted.
    pub fn key(&self) -> String {
        sanitize_label_name(&self.name)
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the validated quality table.
    pub fn quality_table(&self) -> Result<QualityTable, ConfigError> {
        Ok(QualityTable::new(self.quality.clone())?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.server.listen
            )));
        }

        if self.http.timeout_secs == 0 || self.http.lookup_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Upstream timeouts must be > 0".to_string(),
            ));
        }

        if self.http.cache_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache_ttl_secs must be > 0".to_string(),
            ));
        }

        self.quality_table()?;

        let mut ids = HashSet::new();
        for target in &self.targets {
            if target.id.is_empty() {
                return Err(ConfigError::Validation(
                    "Target id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(target.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate target id: {}",
                    target.id
                )));
            }
            validate_target(target)?;
        }

        Ok(())
    }
}

fn validate_target(target: &TargetConfig) -> Result<(), ConfigError> {
    let fail = |msg: String| Err(ConfigError::Validation(format!("Target '{}': {}", target.id, msg)));

    match target.kind {
        AdapterKind::Router | AdapterKind::Socket if target.credentials.is_none() => {
            return fail(format!("{} targets require credentials", target.kind));
        }
        AdapterKind::PublicIp if target.url.is_none() => {
            return fail("public_ip targets require a url".to_string());
        }
        AdapterKind::SpeedTest if target.result_file.is_none() => {
            return fail("speed_test targets require a result_file".to_string());
        }
        _ => {}
    }

    if !target.subsystems.is_empty() && target.kind != AdapterKind::Inverter {
        return fail("only inverter targets can have subsystems".to_string());
    }

    let mut names = HashSet::new();
    for module in &target.modules {
        if !names.insert(module.name.as_str()) {
            return fail(format!("duplicate module '{}'", module.name));
        }

        match target.kind {
            AdapterKind::Inverter if module.name != INVERTER_MODULE => {
                return fail(format!(
                    "unsupported module '{}' (expected {})",
                    module.name, INVERTER_MODULE
                ));
            }
            AdapterKind::Router if !ROUTER_MODULES.contains(&module.name.as_str()) => {
                return fail(format!(
                    "unsupported module '{}' (expected one of {:?})",
                    module.name, ROUTER_MODULES
                ));
            }
            _ => {}
        }

        for metric in &module.metrics {
            let sample = MetricSample::new(&metric.name, "", 0.0).with_unit(metric.unit());
            if !is_valid_metric_name(&sample.family_name()) {
                return fail(format!(
                    "module '{}': invalid metric name '{}'",
                    module.name,
                    sample.family_name()
                ));
            }
            if target.kind == AdapterKind::Inverter && DERIVED_METRICS.contains(&metric.name.as_str())
            {
                return fail(format!(
                    "module '{}': '{}' is computed by the exporter",
                    module.name, metric.name
                ));
            }
        }

        for label in &module.labels {
            if !is_valid_label_name(&label.key()) {
                return fail(format!(
                    "module '{}': invalid label name '{}'",
                    module.name, label.name
                ));
            }
            if target.kind == AdapterKind::SpeedTest
                && INDICATOR_LABELS.contains(&label.key().as_str())
            {
                return fail(format!(
                    "module '{}': label '{}' is reserved for quality indicators",
                    module.name, label.name
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:8000");
        assert!(!config.server.self_metrics);
        assert_eq!(config.http.timeout_secs, 10);
        assert_eq!(config.http.lookup_timeout_secs, 30);
        assert_eq!(config.http.cache_ttl_secs, 3600);
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            server: { listen: "127.0.0.1:9100", self_metrics: true },
            http: { timeout_secs: 5 },
            logging: { level: "debug", format: "json" },
            quality: {
                download: [
                    { bucket: "bad", lower: 0, upper: 9 },
                    { bucket: "average", lower: 10, upper: 19 },
                    { bucket: "good", lower: 20 },
                ],
            },
            targets: [
                {
                    id: "192.168.1.20",
                    kind: "inverter",
                    subsystems: ["192.168.1.21"],
                    modules: [
                        { name: "GetPowerFlowRealtimeData", metrics: ["P_Grid", "P_Load", "P_PV"] },
                    ],
                },
                {
                    id: "192.168.1.30",
                    kind: "socket",
                    credentials: { username: "admin", password: "secret" },
                    modules: [
                        {
                            name: "StatusSNS",
                            metrics: [
                                "Power",
                                { name: "Voltage", unit: "volt", unitsymbol: "V", metrictype: "gauge" },
                            ],
                        },
                    ],
                },
                {
                    id: "192.168.1.1",
                    kind: "router",
                    credentials: { username: "admin", password: "secret" },
                    modules: [
                        { name: "system", metrics: ["cpuload", "memfree"], labels: ["hostname"] },
                        { name: "interface", labels: ["interface-name", "type"] },
                    ],
                },
                {
                    id: "ipinfo.io",
                    kind: "public_ip",
                    url: "https://ipinfo.io/json?token=${token}",
                    token: "abc",
                    modules: [{ name: "public_ip" }],
                },
                {
                    id: "netztest",
                    kind: "speed_test",
                    result_file: "/var/lib/homeprobe/netztest.json",
                    modules: [
                        {
                            name: "netztest",
                            metrics: [{ name: "download", field: "Download" }],
                            labels: [{ name: "ip", field: "Externe IP" }],
                        },
                    ],
                },
            ],
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9100");
        assert!(config.server.self_metrics);
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.logging.format, homeprobe_common::LogFormat::Json);
        assert_eq!(config.targets.len(), 5);

        let inverter = &config.targets[0];
        assert_eq!(inverter.kind, AdapterKind::Inverter);
        assert_eq!(inverter.subsystems, vec!["192.168.1.21"]);
        let module = inverter.module("GetPowerFlowRealtimeData").unwrap();
        assert_eq!(module.metrics[2], MetricSpec::named("P_PV"));

        let socket = &config.targets[1];
        let voltage = &socket.module("StatusSNS").unwrap().metrics[1];
        assert_eq!(voltage.kind, MetricKind::Gauge);
        assert_eq!(voltage.unit(), Some("volt_V".to_string()));

        let router = &config.targets[2];
        let interface = router.module("interface").unwrap();
        assert_eq!(interface.labels[0].key(), "interface_name");
        assert_eq!(interface.labels[0].field(), "interface-name");

        let speed = &config.targets[4];
        let netztest = speed.module("netztest").unwrap();
        assert_eq!(netztest.metrics[0].field(), "Download");
        assert_eq!(netztest.labels[0].key(), "ip");
        assert_eq!(netztest.labels[0].field(), "Externe IP");
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = ExporterConfig::parse(include_str!("../../homeprobe.json5")).unwrap();

        assert_eq!(config.targets.len(), 5);
        assert!(config.quality.contains_key("ping"));
        let table = config.quality_table().unwrap();
        assert_eq!(table.classify("ping", 14.0), Some("good"));
        assert_eq!(table.classify("ping", 19.0), Some("good"));
        assert_eq!(table.classify("ping", 20.0), Some("average"));
        assert_eq!(table.classify("ping", 50.0), Some("bad"));
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ server: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_router_without_credentials() {
        let json = r#"{
            targets: [{ id: "192.168.1.1", kind: "router", modules: [{ name: "system" }] }],
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("require credentials"));
    }

    #[test]
    fn test_validate_duplicate_target() {
        let json = r#"{
            targets: [
                { id: "10.0.0.1", kind: "inverter" },
                { id: "10.0.0.1", kind: "inverter" },
            ],
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("Duplicate target id"));
    }

    #[test]
    fn test_validate_unsupported_router_module() {
        let json = r#"{
            targets: [{
                id: "192.168.1.1",
                kind: "router",
                credentials: { username: "u", password: "p" },
                modules: [{ name: "wifi" }],
            }],
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("unsupported module"));
    }

    #[test]
    fn test_validate_inverter_derived_metric_declared() {
        let json = r#"{
            targets: [{
                id: "10.0.0.1",
                kind: "inverter",
                modules: [{ name: "GetPowerFlowRealtimeData", metrics: ["P_Usage"] }],
            }],
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("computed by the exporter"));
    }

    #[test]
    fn test_validate_invalid_metric_name() {
        let json = r#"{
            targets: [{
                id: "10.0.0.5",
                kind: "speed_test",
                result_file: "/tmp/result.json",
                modules: [{ name: "netztest", metrics: ["down-load"] }],
            }],
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("invalid metric name"));
    }

    #[test]
    fn test_validate_quality_gap_is_fatal() {
        let json = r#"{
            quality: {
                upload: [
                    { bucket: "bad", lower: 0, upper: 4 },
                    { bucket: "good", lower: 10 },
                ],
            },
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(matches!(err, ConfigError::Quality(_)));
    }

    #[test]
    fn test_validate_quality_nan_bound_is_fatal() {
        let json = r#"{
            quality: {
                download: [
                    { bucket: "bad", lower: 0, upper: NaN },
                    { bucket: "good", lower: 50 },
                ],
            },
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Quality(QualityError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_validate_speed_test_indicator_label_reserved() {
        let json = r#"{
            targets: [{
                id: "netztest",
                kind: "speed_test",
                result_file: "/tmp/result.json",
                modules: [{
                    name: "netztest",
                    metrics: [{ name: "download", field: "Download" }],
                    labels: [{ name: "quality", field: "Qualitaet" }],
                }],
            }],
        }"#;
        let err = ExporterConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("reserved for quality indicators"));

        // Other adapters never emit indicators.
        let json = r#"{
            targets: [{
                id: "10.0.0.1",
                kind: "router",
                credentials: { username: "admin", password: "secret" },
                modules: [{ name: "system", labels: ["metric"] }],
            }],
        }"#;
        assert!(ExporterConfig::parse(json).is_ok());
    }

    #[test]
    fn test_metric_spec_sample_metadata() {
        let spec = MetricSpec {
            description: Some("Current power draw".to_string()),
            unit: Some("watt".to_string()),
            ..MetricSpec::named("Power")
        };
        let sample = spec.sample(42.0, "fallback");

        assert_eq!(sample.help, "Current power draw");
        assert_eq!(sample.family_name(), "Power_watt");
        assert_eq!(sample.kind, MetricKind::Untyped);

        let sample = MetricSpec::named("Power").sample(1.0, "fallback");
        assert_eq!(sample.help, "fallback");
        assert_eq!(sample.unit, None);
    }
}
