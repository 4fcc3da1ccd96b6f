use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use crate::{
    geo::GeoLocator,
    models::{ClickEntry, NewClick, UrlRecord},
    store::{RecordStore, StoreError},
};

/// Default bound on writing a click to the store.
pub const DEFAULT_CLICK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on geolocating a click before falling back to the raw IP.
pub const DEFAULT_GEO_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Shortcode not found")]
    NotFound,

    #[error("Shortcode expired")]
    Expired,

    #[error("storage failure: {0}")]
    StoreFailure(#[from] StoreError),
}

/// Request metadata recorded with a click.
#[derive(Debug, Clone, Default)]
pub struct ClickOrigin {
    pub referrer: Option<String>,
    pub client_ip: Option<String>,
}

/// A successful redirect lookup.
#[derive(Debug)]
pub struct Redirect {
    pub target: String,
    /// The detached click-logging task. Dropping the handle leaves it running.
    pub click_logging: JoinHandle<()>,
}

/// Everything the stats endpoint reports about a record.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlStats {
    pub original_url: String,
    pub created_at: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
    pub click_count: i64,
    pub click_logs: Vec<ClickEntry>,
}

impl From<UrlRecord> for UrlStats {
    fn from(r: UrlRecord) -> Self {
        Self {
            original_url: r.original_url,
            created_at: r.created_at,
            expiry: r.expiry,
            click_count: r.click_count,
            click_logs: r.click_logs,
        }
    }
}

/// Read side of the service: redirect targets and stats.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn RecordStore>,
    geo: Option<GeoLocator>,
    geo_timeout: Duration,
    click_timeout: Duration,
    span: Span,
}

impl Resolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_span(store, tracing::info_span!("resolver"))
    }

    /// Build a resolver that reports through `span` instead of its default one.
    /// Detached click tasks inherit the span too.
    pub fn with_span(store: Arc<dyn RecordStore>, span: Span) -> Self {
        Self {
            store,
            geo: None,
            geo_timeout: DEFAULT_GEO_TIMEOUT,
            click_timeout: DEFAULT_CLICK_TIMEOUT,
            span,
        }
    }

    /// Resolve click origins to a location instead of storing the raw IP.
    pub fn geo_locator(mut self, geo: GeoLocator) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn geo_timeout(mut self, timeout: Duration) -> Self {
        self.geo_timeout = timeout;
        self
    }

    pub fn click_timeout(mut self, timeout: Duration) -> Self {
        self.click_timeout = timeout;
        self
    }

    /// Find where `shortcode` points and start logging the click in the
    /// background. The click task's outcome never affects the result.
    pub async fn resolve_for_redirect(
        &self,
        shortcode: &str,
        origin: ClickOrigin,
    ) -> Result<Redirect, ResolveError> {
        let record = self
            .store
            .get(shortcode)
            .instrument(self.span.clone())
            .await?;

        let record = match record {
            None => {
                tracing::debug!(parent: &self.span, "Redirect: '{}' not found", shortcode);
                return Err(ResolveError::NotFound);
            }
            Some(r) if r.is_expired_at(Utc::now()) => {
                tracing::debug!(parent: &self.span, "Redirect: '{}' expired", shortcode);
                return Err(ResolveError::Expired);
            }
            Some(r) => r,
        };

        let click_logging = self.spawn_click_logging(record.shortcode, origin);

        Ok(Redirect {
            target: record.original_url,
            click_logging,
        })
    }

    /// Report a record and its click log. Expired records are reported too.
    pub async fn resolve_for_stats(&self, shortcode: &str) -> Result<UrlStats, ResolveError> {
        match self
            .store
            .get(shortcode)
            .instrument(self.span.clone())
            .await?
        {
            Some(record) => Ok(record.into()),
            None => Err(ResolveError::NotFound),
        }
    }

    fn spawn_click_logging(&self, shortcode: String, origin: ClickOrigin) -> JoinHandle<()> {
        let store = self.store.clone();
        let geo = self.geo.clone();
        let geo_timeout = self.geo_timeout;
        let timeout = self.click_timeout;

        tokio::spawn(
            async move {
                let geo_location = locate(geo.as_ref(), geo_timeout, origin.client_ip).await;
                let click = NewClick {
                    referrer: origin.referrer,
                    geo_location,
                };

                match tokio::time::timeout(timeout, store.append_click(&shortcode, click)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!("Failed to log click for '{}': {}", shortcode, e)
                    }
                    Err(_) => tracing::warn!(
                        "Click logging for '{}' gave up after {:?}",
                        shortcode,
                        timeout
                    ),
                }
            }
            .instrument(self.span.clone()),
        )
    }
}

/// The click's origin: a geolocation when a locator is configured and answers
/// within `budget`, otherwise the address itself.
async fn locate(
    geo: Option<&GeoLocator>,
    budget: Duration,
    client_ip: Option<String>,
) -> Option<String> {
    let ip = client_ip?;
    if let Some(geo) = geo {
        match tokio::time::timeout(budget, geo.lookup(&ip)).await {
            Ok(Some(info)) => return Some(info.to_string()),
            Ok(None) => {}
            Err(_) => tracing::debug!("Geo lookup for {} exceeded {:?}", ip, budget),
        }
    }
    Some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geo::serve_ip_api, models::NewUrlRecord, store::MemoryStore};
    use axum::{routing::get, Json, Router};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    async fn store_with(code: &str, expiry: Option<DateTime<Utc>>) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert(NewUrlRecord {
                original_url: "https://example.com".into(),
                shortcode: code.into(),
                expiry,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn origin() -> ClickOrigin {
        ClickOrigin {
            referrer: Some("https://news.example/".into()),
            client_ip: Some("203.0.113.7".into()),
        }
    }

    /// Serves a live record but cannot record clicks.
    struct ClickFailure {
        inner: MemoryStore,
        hang: bool,
    }

    #[async_trait]
    impl RecordStore for ClickFailure {
        async fn exists(&self, code: &str) -> Result<bool, StoreError> {
            self.inner.exists(code).await
        }
        async fn insert(&self, record: NewUrlRecord) -> Result<UrlRecord, StoreError> {
            self.inner.insert(record).await
        }
        async fn get(&self, code: &str) -> Result<Option<UrlRecord>, StoreError> {
            self.inner.get(code).await
        }
        async fn append_click(&self, _: &str, _: NewClick) -> Result<(), StoreError> {
            if self.hang {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
            Err(StoreError::Backend(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn redirect_logs_click() {
        let store = store_with("abc123", None).await;
        let resolver = Resolver::new(Arc::new(store.clone()));

        let redirect = resolver
            .resolve_for_redirect("abc123", origin())
            .await
            .unwrap();
        assert_eq!(redirect.target, "https://example.com");
        redirect.click_logging.await.unwrap();

        let stats = resolver.resolve_for_stats("abc123").await.unwrap();
        assert_eq!(stats.click_count, 1);
        assert_eq!(stats.click_logs.len(), 1);
        let entry = &stats.click_logs[0];
        assert_eq!(entry.referrer.as_deref(), Some("https://news.example/"));
        assert_eq!(entry.geo_location.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let resolver = Resolver::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            resolver.resolve_for_redirect("nope", origin()).await,
            Err(ResolveError::NotFound)
        ));
        assert!(matches!(
            resolver.resolve_for_stats("nope").await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn past_expiry_is_expired_not_missing() {
        let store = store_with("old", Some(Utc::now() - ChronoDuration::seconds(1))).await;
        let resolver = Resolver::new(Arc::new(store.clone()));

        assert!(matches!(
            resolver.resolve_for_redirect("old", origin()).await,
            Err(ResolveError::Expired)
        ));

        // No click for a refused redirect, but stats still answer.
        let stats = resolver.resolve_for_stats("old").await.unwrap();
        assert_eq!(stats.click_count, 0);
        assert!(stats.expiry.is_some());
    }

    #[tokio::test]
    async fn future_expiry_still_redirects() {
        let store = store_with("soon", Some(Utc::now() + ChronoDuration::days(1))).await;
        let resolver = Resolver::new(Arc::new(store));

        let redirect = resolver.resolve_for_redirect("soon", origin()).await.unwrap();
        assert_eq!(redirect.target, "https://example.com");
    }

    #[tokio::test]
    async fn click_store_error_does_not_fail_redirect() {
        let store = ClickFailure {
            inner: store_with("abc123", None).await,
            hang: false,
        };
        let resolver = Resolver::new(Arc::new(store));

        let redirect = resolver
            .resolve_for_redirect("abc123", origin())
            .await
            .unwrap();
        assert_eq!(redirect.target, "https://example.com");
        // The task swallows the error instead of panicking.
        redirect.click_logging.await.unwrap();
    }

    #[tokio::test]
    async fn slow_click_logging_is_cut_off() {
        let store = ClickFailure {
            inner: store_with("abc123", None).await,
            hang: true,
        };
        let resolver = Resolver::new(Arc::new(store))
            .click_timeout(std::time::Duration::from_millis(20));

        let redirect = resolver
            .resolve_for_redirect("abc123", origin())
            .await
            .unwrap();
        assert_eq!(redirect.target, "https://example.com");

        tokio::time::timeout(std::time::Duration::from_secs(5), redirect.click_logging)
            .await
            .expect("click task should stop at its own timeout")
            .unwrap();
    }

    #[tokio::test]
    async fn located_click_stores_the_location() {
        let endpoint = serve_ip_api(Router::new().route(
            "/json/:ip",
            get(|| async {
                Json(serde_json::json!({
                    "status": "success",
                    "country": "Germany",
                    "regionName": "Berlin",
                    "city": "Berlin",
                }))
            }),
        ))
        .await;
        let store = store_with("abc123", None).await;
        let resolver = Resolver::new(Arc::new(store.clone()))
            .geo_locator(GeoLocator::with_endpoint(endpoint).unwrap());

        let redirect = resolver
            .resolve_for_redirect("abc123", origin())
            .await
            .unwrap();
        redirect.click_logging.await.unwrap();

        let record = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(
            record.click_logs[0].geo_location.as_deref(),
            Some("Berlin, Berlin, Germany")
        );
    }

    #[tokio::test]
    async fn slow_geo_lookup_falls_back_to_ip() {
        let endpoint = serve_ip_api(Router::new().route(
            "/json/:ip",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Json(serde_json::json!({ "status": "success", "country": "Nowhere" }))
            }),
        ))
        .await;
        let store = store_with("abc123", None).await;
        // Lookup gives up after 50ms; the append still runs.
        let resolver = Resolver::new(Arc::new(store.clone()))
            .geo_locator(GeoLocator::with_endpoint(endpoint).unwrap())
            .geo_timeout(std::time::Duration::from_millis(50))
            .click_timeout(std::time::Duration::from_millis(200));

        let redirect = resolver
            .resolve_for_redirect("abc123", origin())
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), redirect.click_logging)
            .await
            .expect("click task should not wait for the geo service")
            .unwrap();

        let record = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(record.click_count, 1);
        assert_eq!(
            record.click_logs[0].geo_location.as_deref(),
            Some("203.0.113.7")
        );
    }

    #[tokio::test]
    async fn missing_client_ip_leaves_origin_empty() {
        let store = store_with("abc123", None).await;
        let resolver = Resolver::new(Arc::new(store.clone()));

        let redirect = resolver
            .resolve_for_redirect("abc123", ClickOrigin::default())
            .await
            .unwrap();
        redirect.click_logging.await.unwrap();

        let record = store.get("abc123").await.unwrap().unwrap();
        assert_eq!(record.click_logs[0].referrer, None);
        assert_eq!(record.click_logs[0].geo_location, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redirects_count_every_click() {
        let store = store_with("abc123", None).await;
        let resolver = Resolver::new(Arc::new(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let redirect = resolver
                .resolve_for_redirect("abc123", origin())
                .await
                .unwrap();
            handles.push(redirect.click_logging);
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = resolver.resolve_for_stats("abc123").await.unwrap();
        assert_eq!(stats.click_count, 40);
        assert_eq!(stats.click_logs.len(), 40);
    }
}
