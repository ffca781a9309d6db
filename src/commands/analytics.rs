//! Analytics endpoint (/api/analytics)

use super::AppState;
use crate::store::Analytics;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/analytics", get(get_analytics))
}

/// GET /api/analytics - Totals over every stored video
async fn get_analytics(State(state): State<Arc<AppState>>) -> Json<Analytics> {
    Json(state.videos.analytics().await)
}
