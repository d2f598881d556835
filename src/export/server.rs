use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::status;
use crate::metrics::MetricsEngine;

/// HTTP server exposing `/metrics`, `/status` and `/healthz`.
pub struct ExportServer {
    addr: String,
    engine: Arc<MetricsEngine>,
    devices: Arc<Vec<String>>,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

impl ExportServer {
    /// `devices` are the addresses listed on the status page.
    pub fn new(addr: &str, engine: Arc<MetricsEngine>, devices: Vec<String>) -> Self {
        Self {
            addr: addr.to_string(),
            engine,
            devices: Arc::new(devices),
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the listener and serves in the background. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let bind_addr = bind_address(&self.addr);

        let app = router(AppState {
            engine: Arc::clone(&self.engine),
            devices: Arc::clone(&self.devices),
        });

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "exporter HTTP server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "exporter HTTP server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

/// Expands the ":port" shorthand to all interfaces.
fn bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<MetricsEngine>,
    devices: Arc<Vec<String>>,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.engine.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "encoding error").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// GET /status - HTML switch table.
async fn status_handler(State(state): State<AppState>) -> Html<String> {
    let statuses = state.engine.switch_status(state.devices.as_slice());
    Html(status::render(&statuses))
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
