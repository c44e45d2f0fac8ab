pub mod fees;
pub mod health;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};

use crate::services::horizon::NetworkFeeSource;
use crate::store::QueryService;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub network: Arc<dyn NetworkFeeSource>,
}

impl FromRef<AppState> for QueryService {
    fn from_ref(state: &AppState) -> Self {
        state.query.clone()
    }
}

impl FromRef<AppState> for Arc<dyn NetworkFeeSource> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.network)
    }
}

/// Read-only routes over the published snapshots, plus the live network view.
pub fn create_router(query: QueryService, network: Arc<dyn NetworkFeeSource>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/windows", get(fees::list_windows))
        .route("/windows/:window", get(fees::window_snapshot))
        .route("/fees/current", get(fees::current_fees))
        .route("/fees/network", get(fees::network_fees))
        .with_state(AppState { query, network })
}
