//! Public address lookup with a process-wide cache.
//!
//! Lookup services are rate limited, so the answer is kept for the configured
//! TTL. The cache lock is held across check-and-refresh: concurrent scrapes
//! of an expired entry trigger a single upstream call and the others observe
//! its result.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use homeprobe_common::{Labels, MetricKind, MetricSample, MetricSet, sanitize_label_name};

use super::{DeviceAdapter, fetch_json, http_client, label_value};
use crate::clock::Clock;
use crate::config::{AdapterKind, ModuleSpec, TargetConfig};
use crate::error::ProbeError;

/// Name of the emitted sample.
pub const PUBLIC_IP_METRIC: &str = "public_ip";

/// Last successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedLookup {
    /// Record returned by the lookup service.
    pub record: Map<String, Value>,
    /// Address reported in the record.
    pub ip: String,
    /// When this address was first reported (Unix seconds).
    pub first_seen: i64,
    /// When the record was fetched (Unix seconds).
    pub last_refreshed: i64,
}

impl CachedLookup {
    fn is_stale(&self, now: i64, ttl: i64) -> bool {
        now - self.last_refreshed > ttl
    }
}

/// Single lock-guarded lookup entry shared by the whole process.
#[derive(Debug)]
pub struct LookupCache {
    entry: Mutex<Option<CachedLookup>>,
    ttl: i64,
}

impl LookupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Mutex::new(None),
            ttl: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Copy of the current entry.
    pub async fn snapshot(&self) -> Option<CachedLookup> {
        self.entry.lock().await.clone()
    }
}

pub struct PublicIpAdapter {
    client: reqwest::Client,
    cache: Arc<LookupCache>,
    clock: Arc<dyn Clock>,
}

impl PublicIpAdapter {
    pub fn new(
        timeout: Duration,
        cache: Arc<LookupCache>,
        clock: Arc<dyn Clock>,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            cache,
            clock,
        })
    }

    async fn refresh(
        &self,
        target: &TargetConfig,
        previous: Option<&CachedLookup>,
        now: i64,
    ) -> Result<CachedLookup, ProbeError> {
        let url = lookup_url(target)?;
        let body = fetch_json(&target.id, self.client.get(&url)).await?;

        let Value::Object(record) = body else {
            return Err(ProbeError::malformed(&target.id, "lookup record is not an object"));
        };
        let ip = record
            .get("ip")
            .and_then(Value::as_str)
            .ok_or_else(|| ProbeError::malformed(&target.id, "lookup record has no ip"))?
            .to_string();

        let first_seen = match previous {
            Some(prev) if prev.ip == ip => prev.first_seen,
            _ => {
                info!(target = %target.id, ip = %ip, "Public address changed");
                now
            }
        };

        Ok(CachedLookup {
            record,
            ip,
            first_seen,
            last_refreshed: now,
        })
    }
}

/// Substitute the target's token into its URL template.
pub fn lookup_url(target: &TargetConfig) -> Result<String, ProbeError> {
    let template = target
        .url
        .as_deref()
        .ok_or_else(|| ProbeError::unreachable(&target.id, "no lookup url configured"))?;
    let token = target.token.as_deref().unwrap_or("");
    Ok(template.replace("${token}", token).replace("$token", token))
}

#[async_trait]
impl DeviceAdapter for PublicIpAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::PublicIp
    }

    async fn collect(
        &self,
        target: &TargetConfig,
        _module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let mut entry = self.cache.entry.lock().await;
        let now = self.clock.now();

        let cached: &CachedLookup = match entry.take() {
            Some(current) if !current.is_stale(now, self.cache.ttl) => {
                debug!(target = %target.id, age = now - current.last_refreshed, "Serving cached lookup");
                entry.insert(current)
            }
            previous => match self.refresh(target, previous.as_ref(), now).await {
                Ok(fresh) => entry.insert(fresh),
                Err(e) => {
                    *entry = previous;
                    return Err(e);
                }
            },
        };

        let mut labels = Labels::new();
        for (key, value) in &cached.record {
            if let Some(value) = label_value(value) {
                labels.insert(sanitize_label_name(key), value);
            }
        }

        let sample = MetricSample::new(
            PUBLIC_IP_METRIC,
            format!("Public IP provided by {}", target.id),
            (now - cached.first_seen) as f64,
        )
        .with_kind(MetricKind::Gauge)
        .with_labels(&labels);

        Ok(std::iter::once(sample).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use httpmock::prelude::*;
    use serde_json::json;

    const T0: i64 = 1_700_000_000;

    fn target(url: String) -> TargetConfig {
        TargetConfig {
            id: "ipinfo.io".into(),
            kind: AdapterKind::PublicIp,
            credentials: None,
            subsystems: vec![],
            url: Some(url),
            token: Some("tok123".into()),
            result_file: None,
            modules: vec![],
        }
    }

    fn module() -> ModuleSpec {
        ModuleSpec {
            name: "public_ip".into(),
            metrics: vec![],
            labels: vec![],
        }
    }

    fn adapter(clock: Arc<ManualClock>) -> (PublicIpAdapter, Arc<LookupCache>) {
        let cache = Arc::new(LookupCache::new(Duration::from_secs(3600)));
        let adapter = PublicIpAdapter::new(Duration::from_secs(2), cache.clone(), clock).unwrap();
        (adapter, cache)
    }

    async fn mock_lookup<'a>(server: &'a MockServer, ip: &str) -> httpmock::Mock<'a> {
        let ip = ip.to_string();
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/json").query_param("token", "tok123");
                then.status(200).json_body(json!({
                    "ip": ip,
                    "hostname": "p5b0a.dip0.example.net",
                    "city": "Berlin",
                    "loc": "52.5244,13.4105",
                    "privacy": {"vpn": false},
                }));
            })
            .await
    }

    #[test]
    fn test_lookup_url() {
        let mut t = target("https://ipinfo.io/json?token=${token}".into());
        assert_eq!(lookup_url(&t).unwrap(), "https://ipinfo.io/json?token=tok123");

        t.url = Some("https://ipinfo.io/json?token=$token".into());
        assert_eq!(lookup_url(&t).unwrap(), "https://ipinfo.io/json?token=tok123");
    }

    #[tokio::test]
    async fn test_sample_shape() {
        let server = MockServer::start_async().await;
        mock_lookup(&server, "203.0.113.7").await;

        let clock = Arc::new(ManualClock::new(T0));
        let (adapter, _) = adapter(clock.clone());
        let t = target(server.url("/json?token=${token}"));

        adapter.collect(&t, &module()).await.unwrap();
        clock.advance(120);
        let set = adapter.collect(&t, &module()).await.unwrap();

        let sample = set.get(PUBLIC_IP_METRIC).unwrap();
        assert_eq!(sample.help, "Public IP provided by ipinfo.io");
        assert_eq!(sample.value, 120.0);
        assert_eq!(sample.labels.get("ip"), Some("203.0.113.7"));
        assert_eq!(sample.labels.get("city"), Some("Berlin"));
        assert_eq!(sample.labels.get("privacy"), None);
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let server = MockServer::start_async().await;
        let lookup = mock_lookup(&server, "203.0.113.7").await;

        let clock = Arc::new(ManualClock::new(T0));
        let (adapter, cache) = adapter(clock.clone());
        let t = target(server.url("/json?token=$token"));

        adapter.collect(&t, &module()).await.unwrap();
        clock.set(T0 + 3600);
        adapter.collect(&t, &module()).await.unwrap();
        assert_eq!(lookup.hits_async().await, 1);

        clock.set(T0 + 3601);
        adapter.collect(&t, &module()).await.unwrap();
        assert_eq!(lookup.hits_async().await, 2);

        let entry = cache.snapshot().await.unwrap();
        assert_eq!(entry.last_refreshed, T0 + 3601);
        assert_eq!(entry.first_seen, T0);
    }

    #[tokio::test]
    async fn test_concurrent_expiry_fetches_once() {
        let server = MockServer::start_async().await;
        let lookup = mock_lookup(&server, "203.0.113.7").await;

        let clock = Arc::new(ManualClock::new(T0));
        let (adapter, _) = adapter(clock);
        let t = target(server.url("/json?token=$token"));
        let m = module();

        let (a, b, c) = tokio::join!(
            adapter.collect(&t, &m),
            adapter.collect(&t, &m),
            adapter.collect(&t, &m)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(lookup.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_address_change_resets_first_seen() {
        let server = MockServer::start_async().await;
        let mut first = mock_lookup(&server, "203.0.113.7").await;

        let clock = Arc::new(ManualClock::new(T0));
        let (adapter, cache) = adapter(clock.clone());
        let t = target(server.url("/json?token=$token"));

        adapter.collect(&t, &module()).await.unwrap();
        first.delete_async().await;
        mock_lookup(&server, "198.51.100.23").await;

        clock.set(T0 + 4000);
        let set = adapter.collect(&t, &module()).await.unwrap();

        let entry = cache.snapshot().await.unwrap();
        assert_eq!(entry.ip, "198.51.100.23");
        assert_eq!(entry.first_seen, T0 + 4000);
        assert_eq!(set.get(PUBLIC_IP_METRIC).unwrap().value, 0.0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_cache() {
        let server = MockServer::start_async().await;
        let mut ok = mock_lookup(&server, "203.0.113.7").await;

        let clock = Arc::new(ManualClock::new(T0));
        let (adapter, cache) = adapter(clock.clone());
        let t = target(server.url("/json?token=$token"));
        adapter.collect(&t, &module()).await.unwrap();
        let before = cache.snapshot().await;

        ok.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/json");
                then.status(429);
            })
            .await;

        clock.set(T0 + 7200);
        let err = adapter.collect(&t, &module()).await.unwrap_err();

        assert!(matches!(err, ProbeError::BackendUnreachable { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(cache.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_record_without_ip_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/json");
                then.status(200).json_body(json!({"city": "Berlin"}));
            })
            .await;

        let (adapter, cache) = adapter(Arc::new(ManualClock::new(T0)));
        let t = target(server.url("/json"));
        let err = adapter.collect(&t, &module()).await.unwrap_err();

        assert!(matches!(err, ProbeError::MalformedUpstreamResponse { .. }));
        assert!(cache.snapshot().await.is_none());
    }
}
