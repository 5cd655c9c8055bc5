use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::store::StoreError;
use crate::services::storage::StorageError;

/// Caller-facing failures of the fitting API.
#[derive(Debug, thiserror::Error)]
pub enum FittingError {
    #[error("Register a photo of yourself before starting a fitting")]
    PhotoRequired,

    #[error("Select at least one item to fit")]
    InsufficientItems,

    #[error("At most {max} items can be fitted at once")]
    TooManyItems { max: usize },

    #[error("Only one item per category can be fitted ({0})")]
    DuplicateCategory(String),

    #[error("Unknown category: {0}")]
    InvalidCategory(String),

    #[error("Item {0} does not exist or has no image")]
    InvalidItemId(i64),

    #[error("Fitting job not found")]
    JobNotFound,

    #[error("You do not have access to this fitting job")]
    Forbidden,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FittingError {
    pub fn code(&self) -> &'static str {
        match self {
            FittingError::PhotoRequired => "PHOTO_REQUIRED",
            FittingError::InsufficientItems => "INSUFFICIENT_ITEMS",
            FittingError::TooManyItems { .. } => "TOO_MANY_ITEMS",
            FittingError::DuplicateCategory(_) => "DUPLICATE_CATEGORY",
            FittingError::InvalidCategory(_) => "INVALID_CATEGORY",
            FittingError::InvalidItemId(_) => "INVALID_ITEM_ID",
            FittingError::JobNotFound => "FITTING_JOB_NOT_FOUND",
            FittingError::Forbidden => "FORBIDDEN",
            FittingError::Unauthorized(_) => "UNAUTHORIZED",
            FittingError::Validation(_) => "VALIDATION_ERROR",
            FittingError::Store(_) | FittingError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FittingError::PhotoRequired
            | FittingError::InsufficientItems
            | FittingError::TooManyItems { .. }
            | FittingError::DuplicateCategory(_)
            | FittingError::InvalidCategory(_)
            | FittingError::InvalidItemId(_)
            | FittingError::Validation(_) => StatusCode::BAD_REQUEST,
            FittingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            FittingError::Forbidden => StatusCode::FORBIDDEN,
            FittingError::JobNotFound => StatusCode::NOT_FOUND,
            FittingError::Store(_) | FittingError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for FittingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": message,
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for FittingError {
    fn from(rejection: JsonRejection) -> Self {
        FittingError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for FittingError {
    fn from(rejection: PathRejection) -> Self {
        FittingError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for FittingError {
    fn from(rejection: QueryRejection) -> Self {
        FittingError::Validation(rejection.body_text())
    }
}
