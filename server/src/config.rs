use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::codegen::{DEFAULT_CODE_LENGTH, MAX_CODE_LENGTH};

/// Where URL records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    /// Process-local; everything is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown storage backend '{other}' (expected sqlite or memory)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./shorturl.db"
    pub database_url: String,

    pub storage_backend: StorageBackend,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when reporting short links, e.g. "https://go.example.com".
    /// Never has a trailing slash.
    pub base_url: String,

    /// Length of generated shortcodes (1-32).
    pub code_length: usize,

    /// Upper bound on writing a redirect's click to the store.
    pub click_log_timeout: Duration,

    /// Store a geolocation instead of the raw client IP with each click.
    pub geo_lookup: bool,

    /// How long a click waits for its geolocation before keeping the raw IP.
    pub geo_lookup_timeout: Duration,

    /// When set, logs are also written to a daily-rolling file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = var("PORT")
            .unwrap_or_else(|| "5000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let storage_backend = var("STORAGE_BACKEND")
            .unwrap_or_else(|| "sqlite".into())
            .parse::<StorageBackend>()
            .context("STORAGE_BACKEND is invalid")?;

        let code_length = var("CODE_LENGTH")
            .map(|v| v.parse::<usize>())
            .transpose()
            .context("CODE_LENGTH must be a number")?
            .unwrap_or(DEFAULT_CODE_LENGTH);
        if !(1..=MAX_CODE_LENGTH).contains(&code_length) {
            anyhow::bail!("CODE_LENGTH must be between 1 and {MAX_CODE_LENGTH}");
        }

        let click_log_timeout = var("CLICK_LOG_TIMEOUT_MS")
            .unwrap_or_else(|| "2000".into())
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("CLICK_LOG_TIMEOUT_MS must be a number of milliseconds")?;

        let geo_lookup_timeout = var("GEO_LOOKUP_TIMEOUT_MS")
            .unwrap_or_else(|| "1000".into())
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("GEO_LOOKUP_TIMEOUT_MS must be a number of milliseconds")?;

        let geo_lookup = match var("GEO_LOOKUP") {
            Some(v) => parse_flag(&v).context("GEO_LOOKUP must be true or false")?,
            None => false,
        };

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:./shorturl.db".into()),
            storage_backend,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            base_url,
            code_length,
            click_log_timeout,
            geo_lookup,
            geo_lookup_timeout,
            log_dir: var("LOG_DIR").filter(|d| !d.trim().is_empty()).map(PathBuf::from),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("'{other}' is not a boolean"),
    }
}
