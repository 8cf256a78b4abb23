//! HTTP scrape endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::exposition::TEXT_CONTENT_TYPE;

#[derive(Clone)]
pub struct ScrapeState {
    pub aggregator: Arc<Aggregator>,
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<ScrapeState>) -> Response {
    let expo = state.aggregator.scrape().await;
    match expo.encode_text() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "encoding exposition failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn healthz() -> &'static str { "ok" }

pub fn router(aggregator: Arc<Aggregator>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .with_state(ScrapeState { aggregator })
}

/// Bind `addr` and serve until `shutdown` resolves. Bind failures are fatal to the caller.
pub async fn serve<F>(addr: SocketAddr, aggregator: Arc<Aggregator>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding scrape endpoint {addr}"))?;
    info!(addr = %addr, kinds = ?aggregator.registry().kinds(), "serving /metrics");
    axum::serve(listener, router(aggregator))
        .with_graceful_shutdown(shutdown)
        .await
        .context("scrape endpoint failed")?;
    Ok(())
}
