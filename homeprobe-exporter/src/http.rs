//! HTTP server for probe requests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use homeprobe_common::{CONTENT_TYPE, encode};

use crate::dispatch::{Dispatcher, ProbeQuery};

/// Header naming the modules that failed in a partially successful probe.
pub const PROBE_ERRORS_HEADER: &str = "x-probe-errors";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Create the HTTP router. `/metrics` is only routed when `self_metrics` is
/// set.
pub fn create_router(dispatcher: Arc<Dispatcher>, self_metrics: bool) -> Router {
    let state = AppState { dispatcher };

    let mut router = Router::new()
        .route("/", get(probe_handler))
        .route("/favicon.ico", get(favicon_handler))
        .route("/health", get(health_handler));
    if self_metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for `/?target=..&module=..`.
async fn probe_handler(State(state): State<AppState>, RawQuery(query): RawQuery) -> Response {
    let query = ProbeQuery::parse(query.as_deref());

    let report = match state.dispatcher.probe(&query).await {
        Ok(report) => report,
        Err(e) => return (e.status_code(), format!("{}\n", e)).into_response(),
    };

    // Nothing to serve, answer with the first failure
    if !report.any_succeeded() {
        let status = report
            .first_error()
            .map(|e| e.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, report.error_lines("")).into_response();
    }

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        report.body(),
    )
        .into_response();

    // Name partial failures in a header
    let failed = report.failed_modules();
    if !failed.is_empty()
        && let Ok(value) = HeaderValue::from_str(&failed.join(","))
    {
        response.headers_mut().insert(PROBE_ERRORS_HEADER, value);
    }
    response
}

/// Browsers ask for an icon; answer with an empty one.
async fn favicon_handler() -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "image/x-icon")], "").into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match encode(&state.dispatcher.stats().to_metric_set()) {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response(),
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    dispatcher: Arc<Dispatcher>,
    listen_addr: SocketAddr,
    self_metrics: bool,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(dispatcher: Arc<Dispatcher>, listen_addr: SocketAddr, self_metrics: bool) -> Self {
        Self {
            dispatcher,
            listen_addr,
            self_metrics,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.dispatcher, self.self_metrics);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            self_metrics = self.self_metrics,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
