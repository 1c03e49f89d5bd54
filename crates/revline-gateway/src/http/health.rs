use std::sync::Arc;

use axum::{extract::State, Json};

use crate::app::AppState;

/// GET /health — liveness plus dependency probes.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let store_ok = state.store.health().await;
    Json(serde_json::json!({
        "status": "ok",
        "session_store": store_ok,
        "active_calls": state.active_calls.len(),
    }))
}
