//! Ledger management endpoints
//!
//! - GET /_info - Server info and registered ledgers
//! - GET /{ledger}/_info - Whether a ledger exists
//! - DELETE /{ledger} - Delete a ledger and its schema

use crate::api::AppState;
use crate::error::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
pub struct ServerInfo {
    pub server: String,
    pub version: String,
    pub driver: String,
    pub ledgers: Vec<String>,
}

pub async fn server_info(State(state): State<Arc<AppState>>) -> Result<Json<ServerInfo>> {
    let ctx = state.request_context();
    let driver = state.resolver.driver();

    let mut ledgers = driver.list(&ctx).await?;
    ledgers.sort();

    Ok(Json(ServerInfo {
        server: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        driver: driver.name().to_string(),
        ledgers,
    }))
}

#[derive(Serialize)]
pub struct LedgerInfo {
    pub name: String,
    pub exists: bool,
}

pub async fn ledger_info(
    State(state): State<Arc<AppState>>,
    Path(ledger): Path<String>,
) -> Result<Json<LedgerInfo>> {
    let ctx = state.request_context();
    let exists = state.resolver.driver().exists(&ctx, &ledger).await?;

    Ok(Json(LedgerInfo {
        name: ledger,
        exists,
    }))
}

#[derive(Serialize)]
pub struct DeleteLedgerResponse {
    pub status: String,
    pub ledger: String,
}

pub async fn delete_ledger(
    State(state): State<Arc<AppState>>,
    Path(ledger): Path<String>,
) -> Result<impl IntoResponse> {
    let ctx = state.request_context();
    state.resolver.delete(&ctx, &ledger).await?;

    info!("Ledger {} deleted via API", ledger);

    Ok((
        StatusCode::OK,
        Json(DeleteLedgerResponse {
            status: "deleted".to_string(),
            ledger,
        }),
    ))
}
