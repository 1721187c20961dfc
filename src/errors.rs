use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::StatusDimension;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("code cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("no free booking code left for {date} after {attempts} attempts")]
    AllocationExhausted { date: String, attempts: u32 },

    #[error("guest data missing for line items: {}", .line_items.join(", "))]
    IncompleteGuestData { line_items: Vec<String> },

    #[error("cannot change {dimension} of line item {line_item} from {from} to {to}")]
    InvalidTransition {
        line_item: String,
        dimension: StatusDimension,
        from: String,
        to: String,
    },

    #[error("line item {line_item} is already {status}")]
    AlreadyTerminal { line_item: String, status: String },

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("cart {0} has no draft line items left to submit")]
    StaleCart(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Whether the caller may retry the same request later without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::CacheUnavailable(_) | AppError::AllocationExhausted { .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AllocationExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::IncompleteGuestData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
            AppError::NotAllowed(_) => StatusCode::CONFLICT,
            AppError::StaleCart(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = match &self {
            AppError::IncompleteGuestData { line_items } => serde_json::json!({
                "error": self.to_string(),
                "line_items": line_items,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}
