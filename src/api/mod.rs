//! HTTP intake for balance updates.

mod error;
mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::application::LedgerService;

pub use error::*;
pub use handlers::{
    BalanceResponse, HealthResponse, SOURCE_TYPE_HEADER, SourceType, UpdateResponse,
};

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Upper bound on a request, including time spent waiting for the
    /// database write lock
    pub request_timeout: Duration,
}

/// Build the API router.
pub fn router(service: Arc<LedgerService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/state", post(handlers::update_state))
        .route("/balance", get(handlers::balance))
        .route("/health", get(handlers::health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    config: &ServerConfig,
    service: Arc<LedgerService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    info!(addr = %config.listen_addr, "HTTP server listening");

    axum::serve(listener, router(service, config.request_timeout))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
