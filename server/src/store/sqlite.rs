use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use super::{RecordStore, StoreError};
use crate::models::{ClickEntry, NewClick, NewUrlRecord, UrlRecord};

/// A row of the `urls` table; the click log lives in `clicks`.
#[derive(Debug, sqlx::FromRow)]
struct UrlRow {
    id: i64,
    original_url: String,
    shortcode: String,
    expiry: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    click_count: i64,
}

impl UrlRow {
    fn with_clicks(self, click_logs: Vec<ClickEntry>) -> UrlRecord {
        UrlRecord {
            id: self.id,
            original_url: self.original_url,
            shortcode: self.shortcode,
            expiry: self.expiry,
            created_at: self.created_at,
            click_count: self.click_count,
            click_logs,
        }
    }
}

/// SQLite-backed record store. Uniqueness comes from the `UNIQUE` index on
/// `urls.shortcode`; click appends run in a write transaction.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating the file if needed) and migrate the database.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(
                database_url
                    .parse::<SqliteConnectOptions>()?
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .foreign_keys(true),
            )
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn exists(&self, shortcode: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM urls WHERE shortcode = ?1)")
                .bind(shortcode)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn insert(&self, record: NewUrlRecord) -> Result<UrlRecord, StoreError> {
        let result = sqlx::query(
            "INSERT INTO urls (original_url, shortcode, expiry, created_at, click_count)
             VALUES (?1, ?2, ?3, ?4, 0)",
        )
        .bind(&record.original_url)
        .bind(&record.shortcode)
        .bind(record.expiry)
        .bind(record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(record.into_record(done.last_insert_rowid())),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(record.shortcode))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, shortcode: &str) -> Result<Option<UrlRecord>, StoreError> {
        // One read transaction so the counter and the log come from the same snapshot.
        let mut tx = self.pool.begin().await?;

        let row: Option<UrlRow> = sqlx::query_as(
            "SELECT id, original_url, shortcode, expiry, created_at, click_count
             FROM urls WHERE shortcode = ?1",
        )
        .bind(shortcode)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let click_logs: Vec<ClickEntry> = sqlx::query_as(
            "SELECT clicked_at AS timestamp, referrer, geo_location
             FROM clicks
             WHERE url_id = ?1
             ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(row.with_clicks(click_logs)))
    }

    async fn append_click(&self, shortcode: &str, click: NewClick) -> Result<(), StoreError> {
        // Starting with the UPDATE takes the write lock up front, so concurrent
        // appends to the same record queue behind each other.
        let mut tx = self.pool.begin().await?;

        let url_id: Option<i64> = sqlx::query_scalar(
            "UPDATE urls SET click_count = click_count + 1 WHERE shortcode = ?1 RETURNING id",
        )
        .bind(shortcode)
        .fetch_optional(&mut *tx)
        .await?;

        let url_id = match url_id {
            Some(id) => id,
            None => {
                tracing::warn!("append_click: shortcode '{}' not found", shortcode);
                return Ok(());
            }
        };

        sqlx::query(
            "INSERT INTO clicks (url_id, clicked_at, referrer, geo_location)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(url_id)
        .bind(Utc::now())
        .bind(click.referrer.as_deref())
        .bind(click.geo_location.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Logged click for '{}'", shortcode);
        Ok(())
    }
}
