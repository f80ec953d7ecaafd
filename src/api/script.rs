//! Script execution endpoint
//!
//! - POST /{ledger}/script?preview=true - Execute (or preview) a script
//!
//! Always answers 200; the error fields of the body carry the outcome.

use crate::api::errors::{ErrorResponse, ERR_CONFLICT, ERR_INTERNAL};
use crate::api::AppState;
use crate::context::Context;
use crate::error::Result;
use crate::ledger::{ExecutionError, ExpandedTransaction, LedgerEngine, ScriptData};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
pub struct ScriptQuery {
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptResponse {
    #[serde(flatten)]
    pub error: ErrorResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<ExpandedTransaction>,
}

/// `yes` and `true` in any case, or exactly `1`.
pub fn parse_preview(value: Option<&str>) -> bool {
    match value {
        Some(v) => {
            let upper = v.to_ascii_uppercase();
            upper == "YES" || upper == "TRUE" || v == "1"
        }
        None => false,
    }
}

/// Runs `script` on `engine` and folds the outcome into a response.
pub async fn execute_script(
    engine: &dyn LedgerEngine,
    ctx: &Context,
    preview: bool,
    script: ScriptData,
) -> ScriptResponse {
    match engine.execute_script(ctx, preview, script).await {
        Ok(transaction) => ScriptResponse {
            error: ErrorResponse::default(),
            transaction: Some(transaction),
        },
        Err(err) => {
            let (code, message) = classify(engine.name(), err);
            ScriptResponse {
                error: ErrorResponse::new(code, message),
                transaction: Some(ExpandedTransaction::default()),
            }
        }
    }
}

fn classify(ledger: &str, err: ExecutionError) -> (String, String) {
    match err {
        ExecutionError::Script { code, message } => (code, message),
        conflict @ ExecutionError::Conflict { .. } => (ERR_CONFLICT.to_string(), conflict.to_string()),
        ExecutionError::Internal(cause) => {
            error!("internal errors executing script on {}: {:#}", ledger, cause);
            (ERR_INTERNAL.to_string(), String::new())
        }
    }
}

pub async fn post_script(
    State(state): State<Arc<AppState>>,
    Path(ledger): Path<String>,
    Query(query): Query<ScriptQuery>,
    Json(script): Json<ScriptData>,
) -> Result<Json<ScriptResponse>> {
    let preview = parse_preview(query.preview.as_deref());
    let ctx = state.request_context();

    debug!("Executing script on {} (preview={})", ledger, preview);

    let engine = state.resolver.get(&ctx, &ledger).await?;
    Ok(Json(execute_script(engine.as_ref(), &ctx, preview, script).await))
}
