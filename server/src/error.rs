use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{resolver::ResolveError, service::ShortenError};

/// Error returned by handlers; rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Shorten(#[from] ShortenError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The request body was not the JSON the endpoint expects.
    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Shorten(e) => match e {
                ShortenError::InvalidUrl
                | ShortenError::InvalidShortcode
                | ShortenError::InvalidExpiry => StatusCode::BAD_REQUEST,
                ShortenError::DuplicateShortcode(_) => StatusCode::CONFLICT,
                ShortenError::CodeGenerationExhausted => StatusCode::SERVICE_UNAVAILABLE,
                ShortenError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Resolve(e) => match e {
                ResolveError::NotFound => StatusCode::NOT_FOUND,
                ResolveError::Expired => StatusCode::GONE,
                ResolveError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Body(rejection) => rejection.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {:?}", self);
            "Internal error".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
