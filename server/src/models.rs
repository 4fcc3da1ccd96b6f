use chrono::{DateTime, Utc};
use serde::Serialize;

/// A shortened URL together with its click history.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    pub id: i64,
    pub original_url: String,
    pub shortcode: String,
    pub expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub click_count: i64,
    /// Arrival order, oldest first.
    pub click_logs: Vec<ClickEntry>,
}

impl UrlRecord {
    /// A record without an expiry never expires. Otherwise it is expired once
    /// `now` is strictly past the expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| now > expiry)
    }
}

/// One redirect traversal.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ClickEntry {
    pub timestamp: DateTime<Utc>,
    pub referrer: Option<String>,
    pub geo_location: Option<String>,
}

/// Fields supplied by the caller when inserting; the store assigns `id` and
/// starts the click counter at zero.
#[derive(Debug, Clone)]
pub struct NewUrlRecord {
    pub original_url: String,
    pub shortcode: String,
    pub expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewUrlRecord {
    pub fn into_record(self, id: i64) -> UrlRecord {
        UrlRecord {
            id,
            original_url: self.original_url,
            shortcode: self.shortcode,
            expiry: self.expiry,
            created_at: self.created_at,
            click_count: 0,
            click_logs: Vec::new(),
        }
    }
}

/// Click metadata captured at redirect time. The timestamp is taken by the
/// store when the entry is appended.
#[derive(Debug, Clone, Default)]
pub struct NewClick {
    pub referrer: Option<String>,
    pub geo_location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expiry: Option<DateTime<Utc>>) -> UrlRecord {
        NewUrlRecord {
            original_url: "https://example.com".into(),
            shortcode: "abc123".into(),
            expiry,
            created_at: Utc::now(),
        }
        .into_record(1)
    }

    #[test]
    fn no_expiry_never_expires() {
        let r = record(None);
        assert!(!r.is_expired_at(Utc::now() + Duration::days(36500)));
    }

    #[test]
    fn expiry_is_strict() {
        let at = Utc::now();
        let r = record(Some(at));
        assert!(!r.is_expired_at(at));
        assert!(r.is_expired_at(at + Duration::milliseconds(1)));
        assert!(!r.is_expired_at(at - Duration::seconds(1)));
    }

    #[test]
    fn new_record_starts_without_clicks() {
        let r = record(None);
        assert_eq!(r.id, 1);
        assert_eq!(r.click_count, 0);
        assert!(r.click_logs.is_empty());
    }
}
