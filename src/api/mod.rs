pub mod errors;
mod health;
mod ledgers;
mod script;

pub use health::health_check;
pub use ledgers::{delete_ledger, ledger_info, server_info};
pub use script::{execute_script, parse_preview, post_script, ScriptResponse};

use crate::context::Context;
use crate::ledger::Resolver;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

/// Shared state for every endpoint.
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub request_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(resolver: Arc<Resolver>, request_timeout: Duration) -> Self {
        Self {
            resolver,
            request_timeout,
            started_at: Instant::now(),
        }
    }

    /// Context bounding the backend work of one request.
    pub fn request_context(&self) -> Context {
        Context::with_timeout(self.request_timeout)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_health", get(health_check))
        .route("/_info", get(server_info))
        .route("/:ledger", delete(delete_ledger))
        .route("/:ledger/_info", get(ledger_info))
        .route("/:ledger/script", post(post_script))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
