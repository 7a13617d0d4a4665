use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::coordinator::PoolCoordinator;
use crate::database::PoolStats;
use crate::error::{PoolError, Result};
use crate::job::PoolHandler;
use crate::metrics;

/// Read-only HTTP surface for pool/miner stats and Prometheus metrics (spec §10.6). Kept
/// separate from the Stratum line server; the coordinator only receives writes through the
/// event bus, this router only ever reads from it.
pub fn router<H: PoolHandler>(coordinator: Arc<PoolCoordinator<H>>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler::<H>))
        .route("/miners/{address}", get(miner_stats_handler::<H>))
        .route("/metrics", get(metrics_route))
        .with_state(coordinator)
}

async fn stats_handler<H: PoolHandler>(
    State(coordinator): State<Arc<PoolCoordinator<H>>>,
) -> Result<Json<PoolStats>> {
    let stats = coordinator.pool_stats().await?;
    Ok(Json(stats))
}

async fn miner_stats_handler<H: PoolHandler>(
    State(coordinator): State<Arc<PoolCoordinator<H>>>,
    Path(address): Path<String>,
) -> Result<Json<crate::database::MinerRecord>> {
    let record = coordinator.miner_stats(&address).await?;
    Ok(Json(record))
}

async fn metrics_route() -> std::result::Result<String, PoolError> {
    Ok(metrics::metrics_handler())
}
