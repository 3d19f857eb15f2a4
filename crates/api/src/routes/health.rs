use axum::{extract::State, routing::get, Json, Router};
use common::CampaignStatus;
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint — no auth required. Used by ops scripts and
/// container orchestrators.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let running = state
        .store
        .list_campaigns(Some(CampaignStatus::Running))
        .await
        .map(|c| c.len())
        .unwrap_or(0);
    Json(json!({
        "status": "ok",
        "campaigns_running": running,
    }))
}
