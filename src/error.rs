use crate::api::errors::{ErrorResponse, ERR_INTERNAL, ERR_NOT_FOUND, ERR_VALIDATION};
use crate::backend::Flavor;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("reserved name: {name}")]
    ReservedName { name: String },

    #[error("ledger not found: {ledger}")]
    NotFound { ledger: String },

    #[error("invalid ledger name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("no usable sql driver for flavor {flavor}: {driver:?}")]
    UnknownDriver {
        flavor: Flavor,
        driver: Option<String>,
    },

    #[error("connection failed to {schema}: {cause}")]
    ConnectionFailed { schema: String, cause: String },

    #[error("schema {schema} is closed")]
    Closed { schema: String },

    #[error("query failed in {schema}: {cause}")]
    QueryFailed { schema: String, cause: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn query(schema: &str, cause: impl ToString) -> Self {
        StorageError::QueryFailed {
            schema: schema.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn connection(schema: &str, cause: impl ToString) -> Self {
        StorageError::ConnectionFailed {
            schema: schema.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, StorageError::Cancelled | StorageError::DeadlineExceeded)
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            StorageError::ReservedName { .. } | StorageError::InvalidName { .. } => {
                (StatusCode::BAD_REQUEST, ERR_VALIDATION, self.to_string())
            }
            StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, ERR_NOT_FOUND, self.to_string()),
            e if e.is_cancellation() => {
                warn!("request abandoned: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, ERR_INTERNAL, String::new())
            }
            StorageError::ConnectionFailed { .. } => {
                error!("storage unavailable: {}", self);
                (StatusCode::SERVICE_UNAVAILABLE, ERR_INTERNAL, String::new())
            }
            _ => {
                error!("internal storage error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, ERR_INTERNAL, String::new())
            }
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Internal(format!("IO error: {}", err))
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Internal(format!("Blocking task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_kinds() {
        assert!(StorageError::Cancelled.is_cancellation());
        assert!(StorageError::DeadlineExceeded.is_cancellation());
        assert!(!StorageError::NotFound { ledger: "a".into() }.is_cancellation());
    }

    #[test]
    fn test_status_mapping() {
        let reserved = StorageError::ReservedName { name: "_system".into() }.into_response();
        assert_eq!(reserved.status(), StatusCode::BAD_REQUEST);

        let missing = StorageError::NotFound { ledger: "quickstart".into() }.into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let internal = StorageError::Internal("boom".into()).into_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_cancellation_hides_message() {
        for err in [StorageError::Cancelled, StorageError::DeadlineExceeded] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["errorCode"], ERR_INTERNAL);
            assert!(body.get("errorMessage").is_none());
            assert!(body.get("details").is_none());
        }
    }
}
