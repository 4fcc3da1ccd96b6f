use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{Instrument, Span};

use crate::{
    codegen::{self, DEFAULT_CODE_LENGTH},
    models::{NewUrlRecord, UrlRecord},
    store::{RecordStore, StoreError},
};

/// How many random candidates are tried before giving up on a generated code.
pub const MAX_GENERATION_ATTEMPTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ShortenError {
    #[error("URL must be an absolute http:// or https:// URL with a host")]
    InvalidUrl,

    #[error("shortcode must be 1-32 letters or digits")]
    InvalidShortcode,

    #[error("expiry is out of range")]
    InvalidExpiry,

    #[error("shortcode '{0}' is already taken")]
    DuplicateShortcode(String),

    #[error("could not find a free shortcode after {} attempts", MAX_GENERATION_ATTEMPTS)]
    CodeGenerationExhausted,

    #[error("storage failure: {0}")]
    StoreFailure(#[source] StoreError),
}

impl From<StoreError> for ShortenError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(code) => ShortenError::DuplicateShortcode(code),
            other => ShortenError::StoreFailure(other),
        }
    }
}

/// Input to [`Shortener::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub original_url: String,
    pub requested_code: Option<String>,
    /// Days until the link expires. `None` or `0` means it never expires.
    pub expiry_days: Option<u32>,
}

/// Creates URL records: validates the target, settles on a unique shortcode
/// and persists the record.
#[derive(Clone)]
pub struct Shortener {
    store: Arc<dyn RecordStore>,
    code_length: usize,
    span: Span,
}

impl Shortener {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_span(store, tracing::info_span!("shortener"))
    }

    /// Build a shortener that reports through `span` instead of its default one.
    pub fn with_span(store: Arc<dyn RecordStore>, span: Span) -> Self {
        Self {
            store,
            code_length: DEFAULT_CODE_LENGTH,
            span,
        }
    }

    pub fn code_length(mut self, length: usize) -> Self {
        self.code_length = length;
        self
    }

    pub async fn create(&self, request: CreateRequest) -> Result<UrlRecord, ShortenError> {
        self.create_inner(request)
            .instrument(self.span.clone())
            .await
    }

    async fn create_inner(&self, request: CreateRequest) -> Result<UrlRecord, ShortenError> {
        let original_url = request.original_url.trim();
        if !is_valid_url(original_url) {
            tracing::debug!("Rejected URL '{}'", original_url);
            return Err(ShortenError::InvalidUrl);
        }

        let created_at = Utc::now();
        let expiry = match request.expiry_days.filter(|days| *days > 0) {
            Some(days) => Some(
                created_at
                    .checked_add_signed(Duration::days(i64::from(days)))
                    .ok_or(ShortenError::InvalidExpiry)?,
            ),
            None => None,
        };

        let new_record = |shortcode: String| NewUrlRecord {
            original_url: original_url.to_owned(),
            shortcode,
            expiry,
            created_at,
        };

        let requested = request
            .requested_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let record = match requested {
            Some(code) => {
                if !codegen::is_valid_shortcode(code) {
                    return Err(ShortenError::InvalidShortcode);
                }
                if self.store.exists(code).await? {
                    return Err(ShortenError::DuplicateShortcode(code.to_owned()));
                }
                // A concurrent creator can still win between the check and the
                // insert; the store's Duplicate maps to DuplicateShortcode.
                self.store.insert(new_record(code.to_owned())).await?
            }
            None => self.insert_generated(new_record).await?,
        };

        tracing::info!(
            "Created shortcode '{}' (id={}) -> {}",
            record.shortcode,
            record.id,
            record.original_url
        );
        Ok(record)
    }

    /// Try random codes until one is inserted. Only collisions are retried.
    async fn insert_generated(
        &self,
        new_record: impl Fn(String) -> NewUrlRecord,
    ) -> Result<UrlRecord, ShortenError> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = codegen::generate_code(self.code_length);

            if self.store.exists(&code).await? {
                tracing::warn!("Shortcode collision on attempt {}: {}", attempt, code);
                continue;
            }

            match self.store.insert(new_record(code)).await {
                Ok(record) => {
                    tracing::debug!(
                        "Generated unique shortcode on attempt {}: {}",
                        attempt,
                        record.shortcode
                    );
                    return Ok(record);
                }
                Err(StoreError::Duplicate(code)) => {
                    tracing::warn!(
                        "Shortcode collision at insert on attempt {}: {}",
                        attempt,
                        code
                    );
                }
                Err(e) => return Err(ShortenError::StoreFailure(e)),
            }
        }

        tracing::error!(
            "Failed to generate unique shortcode after {} attempts",
            MAX_GENERATION_ATTEMPTS
        );
        Err(ShortenError::CodeGenerationExhausted)
    }
}

/// `true` for absolute http/https URLs with a non-empty host.
pub fn is_valid_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}
