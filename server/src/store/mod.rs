use async_trait::async_trait;

use crate::models::{NewClick, NewUrlRecord, UrlRecord};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The unique constraint on `shortcode` rejected an insert.
    #[error("shortcode '{0}' is already taken")]
    Duplicate(String),

    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Persistence for URL records and their click logs.
///
/// Implementations own the correctness of shortcode uniqueness and of the
/// counter + log mutation; callers may pre-check with [`exists`] but must treat
/// [`StoreError::Duplicate`] from [`insert`] as authoritative.
///
/// [`exists`]: RecordStore::exists
/// [`insert`]: RecordStore::insert
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn exists(&self, shortcode: &str) -> Result<bool, StoreError>;

    /// Insert a record with an empty click log and return it with its id.
    async fn insert(&self, record: NewUrlRecord) -> Result<UrlRecord, StoreError>;

    /// Fetch a record and its full click log as one consistent snapshot.
    async fn get(&self, shortcode: &str) -> Result<Option<UrlRecord>, StoreError>;

    /// Bump `click_count` and append one click entry, atomically. Appending to
    /// an unknown shortcode logs a warning and does nothing.
    async fn append_click(&self, shortcode: &str, click: NewClick) -> Result<(), StoreError>;
}
