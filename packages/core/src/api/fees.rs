use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::AppError;
use crate::insights::types::{Snapshot, WindowId};
use crate::services::horizon::{NetworkFeeSource, NetworkFeeStats};
use crate::store::QueryService;

#[derive(Debug, Serialize)]
pub struct WindowEntry {
    pub window: WindowId,
    pub duration_secs: u64,
    pub published: bool,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct WindowList {
    pub windows: Vec<WindowEntry>,
}

/// `GET /windows`
pub async fn list_windows(State(query): State<QueryService>) -> Json<WindowList> {
    let windows = query
        .list_windows()
        .into_iter()
        .map(|window| {
            let snapshot = query.get_snapshot(window);
            WindowEntry {
                window,
                duration_secs: window.as_secs(),
                published: snapshot.is_some(),
                stale: snapshot.map_or(false, |s| s.stale),
            }
        })
        .collect();

    Json(WindowList { windows })
}

/// `GET /windows/:window`, where the window is written as `5m`, `300s` or `300`.
pub async fn window_snapshot(
    State(query): State<QueryService>,
    Path(window): Path<String>,
) -> Result<Json<Snapshot>, AppError> {
    let id: WindowId = window
        .parse()
        .map_err(|e: String| AppError::Parse(format!("window {:?}: {}", window, e)))?;

    let snapshot = lookup(&query, id)?;
    Ok(Json((*snapshot).clone()))
}

/// `GET /fees/current`: the latest snapshot of the shortest window.
pub async fn current_fees(State(query): State<QueryService>) -> Result<Json<Snapshot>, AppError> {
    let shortest = query
        .list_windows()
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("no windows configured".into()))?;

    let snapshot = lookup(&query, shortest)?;
    Ok(Json((*snapshot).clone()))
}

/// `GET /fees/network`: Horizon's `fee_stats` for recent ledgers, fetched live.
pub async fn network_fees(
    State(network): State<Arc<dyn NetworkFeeSource>>,
) -> Result<Json<NetworkFeeStats>, AppError> {
    let stats = network.network_fee_stats().await?;
    Ok(Json(stats))
}

fn lookup(query: &QueryService, window: WindowId) -> Result<Arc<Snapshot>, AppError> {
    query
        .get_snapshot(window)
        .ok_or_else(|| AppError::NotFound(format!("no snapshot published for window {}", window)))
}
