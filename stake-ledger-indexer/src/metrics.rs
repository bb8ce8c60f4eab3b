// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const CYCLE_SEC_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10., 30., 60., 120., 300., 600., 1800., 3600.,
];

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub(crate) cycles: IntCounterVec,
    pub(crate) cycle_duration: Histogram,
    pub(crate) backfill_passes: IntCounterVec,
    pub(crate) registered_identities: IntGauge,
    pub(crate) last_cycle_timestamp: IntGauge,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            cycles: register_int_counter_vec_with_registry!(
                "indexer_cycles",
                "Scan, reconcile and statistics cycles run by the service, by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
            cycle_duration: register_histogram_with_registry!(
                "indexer_cycle_duration",
                "Wall time of one service cycle in seconds",
                CYCLE_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            backfill_passes: register_int_counter_vec_with_registry!(
                "indexer_backfill_passes",
                "Backfill passes run by the service, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            registered_identities: register_int_gauge_with_registry!(
                "indexer_registered_identities",
                "Identities registered from the configuration at startup",
                registry,
            )
            .unwrap(),
            last_cycle_timestamp: register_int_gauge_with_registry!(
                "indexer_last_cycle_timestamp",
                "Unix time at which the last successful cycle finished",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            buffer,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Serves `/metrics` until `cancel` fires.
pub async fn start_metrics_server(
    address: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("[Metrics] Serving prometheus metrics on {}", address);

    Ok(tokio::spawn(async move {
        let serve = axum::serve(listener, metrics_router(registry))
            .with_graceful_shutdown(async move { cancel.cancelled().await });
        if let Err(e) = serve.await {
            error!("[Metrics] Server error: {:?}", e);
        }
    }))
}
