//! Prometheus metrics of the indexer, served next to its health check.
use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::info;

use crate::{balance_indexer::IndexerHealth, health::HealthCheckable};

#[derive(Clone)]
pub struct IndexerMetrics {
    /// Planned slots of the current cycle not yet committed.
    pub slots_with_missing_balances: IntGauge,
    /// Cycles that aborted.
    pub balance_indexing_errors: IntCounter,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let slots_with_missing_balances = IntGauge::new(
            "slots_with_missing_balances",
            "Number of slots for which balances still need to be indexed",
        )?;
        registry.register(Box::new(slots_with_missing_balances.clone()))?;

        let balance_indexing_errors = IntCounter::new(
            "balance_indexing_errors",
            "Number of indexing cycles that failed",
        )?;
        registry.register(Box::new(balance_indexing_errors.clone()))?;

        Ok(Self {
            slots_with_missing_balances,
            balance_indexing_errors,
        })
    }
}

pub fn encode_text(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metrics")?;
    String::from_utf8(buffer).context("metrics text is not utf-8")
}

struct State {
    health: Arc<IndexerHealth>,
    registry: Registry,
}

type StateExtension = Extension<Arc<State>>;

fn metrics_response(registry: &Registry) -> Response {
    match encode_text(registry) {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response(),
    }
}

pub async fn serve(port: u16, registry: Registry, health: Arc<IndexerHealth>) -> Result<()> {
    let shared_state = Arc::new(State { health, registry });

    let app = Router::new()
        .route(
            "/metrics",
            get(|state: StateExtension| async move { metrics_response(&state.registry) }),
        )
        .route(
            "/healthz",
            get(|state: StateExtension| async move { state.health.health_status() }),
        )
        .layer(Extension(shared_state));

    let socket_addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "metrics server listening");
    axum::Server::bind(&socket_addr)
        .serve(app.into_make_service())
        .await
        .context("metrics server failed")
}
