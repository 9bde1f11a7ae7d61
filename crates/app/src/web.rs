use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use whalewatch_ingestion::{AssetRegistry, QueueMetrics, QueueMetricsSnapshot};

use crate::telemetry::PrometheusExporter;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
pub struct WebState {
    inner: Arc<WebStateInner>,
}

struct WebStateInner {
    exporter: PrometheusExporter,
    metrics: Arc<QueueMetrics>,
    registry: Arc<AssetRegistry>,
    started_at: DateTime<Utc>,
}

impl WebState {
    pub fn new(
        exporter: PrometheusExporter,
        metrics: Arc<QueueMetrics>,
        registry: Arc<AssetRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(WebStateInner {
                exporter,
                metrics,
                registry,
                started_at: Utc::now(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    registry_tokens: usize,
    registry_known_wallets: usize,
    registry_refreshed_at: Option<DateTime<Utc>>,
    pipeline: QueueMetricsSnapshot,
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics server on {addr}"))
}

pub async fn run_server(
    listener: TcpListener,
    state: WebState,
    cancel: CancellationToken,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("metrics listener has no local address")?;
    info!(bind = %local_addr, "metrics server started");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("metrics server failed")
}

fn build_router(state: WebState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

async fn metrics(State(state): State<WebState>) -> Response {
    match state.inner.exporter.render() {
        Ok(body) => ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "metrics render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

async fn health(State(state): State<WebState>) -> Json<HealthResponse> {
    let snapshot = state.inner.registry.snapshot();
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        started_at: state.inner.started_at,
        uptime_seconds: (now - state.inner.started_at).num_seconds(),
        registry_tokens: snapshot.token_count(),
        registry_known_wallets: snapshot.wallet_count(),
        registry_refreshed_at: snapshot.refreshed_at(),
        pipeline: state.inner.metrics.snapshot(),
    })
}
