use crate::{
    codegen,
    error::ApiError,
    resolver::{ClickOrigin, ResolveError},
    AppState,
};
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};

/// GET /:code
///
/// 1. Resolve the code; unknown codes are 404, expired ones 410.
/// 2. The resolver has already spawned the click-logging task; its handle is
///    dropped here so the response never waits on analytics.
/// 3. Return a 302 redirect to the original URL.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Anything that can't be a shortcode can't be in the store either.
    if !codegen::is_valid_shortcode(&code) {
        return Err(ResolveError::NotFound.into());
    }

    let origin = ClickOrigin {
        referrer: headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned),
        client_ip: extract_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
    };

    let redirect = state.resolver.resolve_for_redirect(&code, origin).await?;

    Ok((StatusCode::FOUND, [(header::LOCATION, redirect.target)]).into_response())
}

/// Determine the real client IP, preferring common proxy headers.
fn extract_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> Option<String> {
    // X-Forwarded-For can be a comma-separated list; take the first entry.
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim);

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    forwarded
        .into_iter()
        .chain(real_ip)
        .find(|ip| !ip.is_empty())
        .map(str::to_owned)
        .or_else(|| addr.map(|a| a.ip().to_string()))
}
