use crate::api::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    storage_connected: bool,
    ledgers: usize,
    uptime_seconds: u64,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ctx = state.request_context();
    let listed = state.resolver.driver().list(&ctx).await;

    let storage_connected = listed.is_ok();
    let ledgers = listed.map(|l| l.len()).unwrap_or(0);

    Json(HealthResponse {
        status: if storage_connected {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        storage_connected,
        ledgers,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
