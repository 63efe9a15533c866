//! Router adapter with challenge-response login.
//!
//! Each router target owns a session: an HTTP client with a cookie store and
//! the login state. Every collection logs in again before reading, since the
//! router expires sessions on its own schedule:
//!
//! ```text
//! Unauthenticated --GET /auth 200--> Authenticated
//! Unauthenticated --GET /auth 401--> Challenged{realm, challenge}
//! Challenged --POST /auth 200--> Authenticated
//! ```
//!
//! Any failure leaves the session `Unauthenticated`.

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::{Value, json};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use homeprobe_common::{MetricSample, MetricSet, sanitize_metric_name};

use super::{DeviceAdapter, declared_samples, fetch_json, record_labels};
use crate::config::{AdapterKind, Credentials, ModuleSpec, TargetConfig};
use crate::error::ProbeError;

/// Modules routers answer to.
pub const ROUTER_MODULES: [&str; 2] = ["system", "interface"];

const REALM_HEADER: &str = "X-NDM-Realm";
const CHALLENGE_HEADER: &str = "X-NDM-Challenge";

/// Login progress of a router session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Challenged { realm: String, challenge: String },
    Authenticated,
}

/// `hex(sha256(challenge + hex(md5(username ":" realm ":" password))))`
pub fn challenge_response(username: &str, realm: &str, password: &str, challenge: &str) -> String {
    let inner = hex::encode(Md5::digest(format!("{}:{}:{}", username, realm, password)));
    hex::encode(Sha256::digest(format!("{}{}", challenge, inner)))
}

struct RouterSession {
    client: reqwest::Client,
    state: AuthState,
}

impl RouterSession {
    fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            state: AuthState::Unauthenticated,
        })
    }

    async fn login(&mut self, target: &TargetConfig) -> Result<(), ProbeError> {
        let credentials = target
            .credentials
            .as_ref()
            .ok_or_else(|| ProbeError::auth_failed(&target.id, "no credentials configured"))?;

        self.state = AuthState::Unauthenticated;
        let mut state = AuthState::Unauthenticated;
        while state != AuthState::Authenticated {
            state = self.advance(state, target, credentials).await?;
        }
        self.state = state;
        Ok(())
    }

    async fn advance(
        &self,
        state: AuthState,
        target: &TargetConfig,
        credentials: &Credentials,
    ) -> Result<AuthState, ProbeError> {
        let url = format!("{}/auth", target.base_url());

        match state {
            AuthState::Unauthenticated => {
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| ProbeError::unreachable(&target.id, e))?;

                match response.status() {
                    reqwest::StatusCode::OK => Ok(AuthState::Authenticated),
                    reqwest::StatusCode::UNAUTHORIZED => {
                        let header = |name: &str| {
                            response
                                .headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string)
                                .ok_or_else(|| {
                                    ProbeError::malformed(&target.id, format!("missing {} header", name))
                                })
                        };
                        Ok(AuthState::Challenged {
                            realm: header(REALM_HEADER)?,
                            challenge: header(CHALLENGE_HEADER)?,
                        })
                    }
                    status => Err(ProbeError::auth_failed(
                        &target.id,
                        format!("unexpected status {}", status),
                    )),
                }
            }
            AuthState::Challenged { realm, challenge } => {
                let password = challenge_response(
                    &credentials.username,
                    &realm,
                    &credentials.password,
                    &challenge,
                );
                let response = self
                    .client
                    .post(&url)
                    .json(&json!({ "login": credentials.username, "password": password }))
                    .send()
                    .await
                    .map_err(|e| ProbeError::unreachable(&target.id, e))?;

                if response.status() == reqwest::StatusCode::OK {
                    Ok(AuthState::Authenticated)
                } else {
                    Err(ProbeError::auth_failed(
                        &target.id,
                        format!("login rejected with status {}", response.status()),
                    ))
                }
            }
            AuthState::Authenticated => Ok(AuthState::Authenticated),
        }
    }

    async fn read(
        &mut self,
        target: &TargetConfig,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ProbeError> {
        let request = self
            .client
            .get(format!("{}{}", target.base_url(), path))
            .query(query);

        let result = fetch_json(&target.id, request).await;
        if result.is_err() {
            self.state = AuthState::Unauthenticated;
        }
        result
    }
}

pub struct RouterAdapter {
    sessions: HashMap<String, Arc<Mutex<RouterSession>>>,
}

impl RouterAdapter {
    /// Create one session per router target.
    pub fn new<'a>(
        targets: impl IntoIterator<Item = &'a TargetConfig>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let mut sessions = HashMap::new();
        for target in targets {
            if target.kind == AdapterKind::Router {
                sessions.insert(
                    target.id.clone(),
                    Arc::new(Mutex::new(RouterSession::new(timeout)?)),
                );
            }
        }
        Ok(Self { sessions })
    }

    async fn system(
        session: &mut RouterSession,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let record = session.read(target, "/rci/show/system", &[]).await?;
        if !record.is_object() {
            return Err(ProbeError::malformed(&target.id, "system record is not an object"));
        }

        let labels = record_labels(&record, &module.labels);
        Ok(declared_samples(&record, module, &labels, |name| {
            format!("Router system metric {}", name)
        }))
    }

    async fn interfaces(
        session: &mut RouterSession,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let listing = session.read(target, "/rci/show/interface", &[]).await?;
        let interfaces: Vec<Value> = match listing {
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Array(items) => items,
            _ => {
                return Err(ProbeError::malformed(
                    &target.id,
                    "interface listing is not an object",
                ));
            }
        };

        let mut set = MetricSet::new();
        for iface in interfaces
            .iter()
            .filter(|i| i.get("link").and_then(Value::as_str) == Some("up"))
        {
            let Some(name) = iface
                .get("interface-name")
                .or_else(|| iface.get("id"))
                .and_then(Value::as_str)
            else {
                debug!(target = %target.id, "Skipping interface without a name");
                continue;
            };

            let stats = session
                .read(target, "/rci/show/interface/stat", &[("name", name)])
                .await?;
            let labels = record_labels(iface, &module.labels);

            if module.metrics.is_empty() {
                let Some(stats) = stats.as_object() else {
                    return Err(ProbeError::malformed(
                        &target.id,
                        format!("statistics for {} are not an object", name),
                    ));
                };
                for (field, value) in stats {
                    if let Some(value) = value.as_f64() {
                        let metric = sanitize_metric_name(field);
                        let help = format!("Router interface metric {}", metric);
                        set.push(MetricSample::new(metric, help, value).with_labels(&labels));
                    }
                }
            } else {
                set.extend(declared_samples(&stats, module, &labels, |name| {
                    format!("Router interface metric {}", name)
                }));
            }
        }

        Ok(set)
    }
}

#[async_trait]
impl DeviceAdapter for RouterAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Router
    }

    async fn collect(
        &self,
        target: &TargetConfig,
        module: &ModuleSpec,
    ) -> Result<MetricSet, ProbeError> {
        let session = self
            .sessions
            .get(&target.id)
            .ok_or_else(|| ProbeError::UnknownTarget(target.id.clone()))?;
        let mut session = session.lock().await;

        session.login(target).await?;
        debug!(target = %target.id, "Router session authenticated");

        match module.name.as_str() {
            "system" => Self::system(&mut session, target, module).await,
            "interface" => Self::interfaces(&mut session, target, module).await,
            other => Err(ProbeError::UnknownModule {
                target: target.id.clone(),
                module: other.to_string(),
            }),
        }
    }
}
