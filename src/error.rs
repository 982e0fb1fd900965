use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::translate::{TranslateError, UnsupportedLanguage};

/// Errors surfaced by the HTTP layer. Every variant renders as
/// `{"detail": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("translation failed")]
    Translation(#[from] TranslateError),
}

impl From<UnsupportedLanguage> for ApiError {
    fn from(err: UnsupportedLanguage) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Unprocessable(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Translation(err) => {
                error!("Translation error: {:#}", anyhow::Error::new(err));
                (StatusCode::INTERNAL_SERVER_ERROR, "Translation failed".to_string())
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
