use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod codegen;
mod config;
mod error;
mod geo;
mod handlers;
mod models;
mod resolver;
mod service;
mod store;

use config::{AppConfig, StorageBackend};
use geo::GeoLocator;
use resolver::Resolver;
use service::Shortener;
use store::{MemoryStore, RecordStore, SqliteStore};

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: AppConfig,
    pub shortener: Shortener,
    pub resolver: Resolver,
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env; a missing file is fine when the environment is already set
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    // Keep the guard alive for the whole process so buffered file logs are flushed.
    let _log_guard = init_tracing(&config)?;

    tracing::info!("Starting shorturl on {}", config.bind_addr());
    tracing::info!("Base URL: {}", config.base_url);

    let store: Arc<dyn RecordStore> = match config.storage_backend {
        StorageBackend::Sqlite => Arc::new(
            SqliteStore::connect(&config.database_url)
                .await
                .with_context(|| format!("failed to open database {}", config.database_url))?,
        ),
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let shortener = Shortener::with_span(store.clone(), tracing::info_span!("shortener"))
        .code_length(config.code_length);

    let mut resolver = Resolver::with_span(store, tracing::info_span!("resolver"))
        .click_timeout(config.click_log_timeout);
    if config.geo_lookup {
        resolver = resolver
            .geo_locator(GeoLocator::new().context("failed to build geo client")?)
            .geo_timeout(config.geo_lookup_timeout);
        tracing::info!("Click geolocation enabled");
    }

    let bind_addr = config.bind_addr();
    let state = Arc::new(AppState {
        config,
        shortener,
        resolver,
    });

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        .route("/shorturls", post(handlers::create::create_short_url))
        .route("/shorturls/:code", get(handlers::stats::stats))
        // Short-link redirect; static routes above take priority
        .route("/:code", get(handlers::redirect::redirect))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ── Logging ────────────────────────────────────────────────────────────────

/// Structured logging to stdout, plus a daily-rolling file when `LOG_DIR` is set.
fn init_tracing(config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shorturl=info,tower_http=info".into());

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "shorturl.log"));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
