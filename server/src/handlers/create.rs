use crate::{error::ApiError, service::CreateRequest, AppState};
use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateShortUrl {
    url: String,
    shortcode: Option<String>,
    /// Days until expiry.
    expiry: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreatedShortUrl {
    shortcode: String,
    original_url: String,
    expiry: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    short_url: String,
}

/// POST /shorturls
pub async fn create_short_url(
    State(state): State<Arc<AppState>>,
    WithRejection(Json(body), _): WithRejection<Json<CreateShortUrl>, ApiError>,
) -> Result<(StatusCode, Json<CreatedShortUrl>), ApiError> {
    let record = state
        .shortener
        .create(CreateRequest {
            original_url: body.url,
            requested_code: body.shortcode,
            expiry_days: body.expiry,
        })
        .await?;

    let short_url = format!("{}/{}", state.config.base_url, record.shortcode);

    Ok((
        StatusCode::CREATED,
        Json(CreatedShortUrl {
            shortcode: record.shortcode,
            original_url: record.original_url,
            expiry: record.expiry,
            created_at: record.created_at,
            short_url,
        }),
    ))
}
