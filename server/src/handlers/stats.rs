use crate::{codegen, error::ApiError, models::ClickEntry, resolver::ResolveError, AppState};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ShortUrlStats {
    original_url: String,
    creation_date: DateTime<Utc>,
    expiry: Option<DateTime<Utc>>,
    click_count: i64,
    click_logs: Vec<ClickEntry>,
}

/// GET /shorturls/:code
///
/// Expired links are still reported; expiry is informational here.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ShortUrlStats>, ApiError> {
    if !codegen::is_valid_shortcode(&code) {
        return Err(ResolveError::NotFound.into());
    }

    let stats = state.resolver.resolve_for_stats(&code).await?;

    Ok(Json(ShortUrlStats {
        original_url: stats.original_url,
        creation_date: stats.created_at,
        expiry: stats.expiry,
        click_count: stats.click_count,
        click_logs: stats.click_logs,
    }))
}
