use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use super::{RecordStore, StoreError};
use crate::models::{ClickEntry, NewClick, NewUrlRecord, UrlRecord};

/// Process-local record store backed by a DashMap keyed by shortcode.
///
/// Inserts go through the entry API and appends through `get_mut`, both of
/// which hold the shard's write lock for the duration of the mutation. That
/// lock is what makes uniqueness and counter + log updates atomic here.
/// Nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, UrlRecord>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn exists(&self, shortcode: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(shortcode))
    }

    async fn insert(&self, record: NewUrlRecord) -> Result<UrlRecord, StoreError> {
        match self.records.entry(record.shortcode.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(record.shortcode)),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                let stored = record.into_record(id);
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn get(&self, shortcode: &str) -> Result<Option<UrlRecord>, StoreError> {
        Ok(self.records.get(shortcode).map(|r| r.clone()))
    }

    async fn append_click(&self, shortcode: &str, click: NewClick) -> Result<(), StoreError> {
        match self.records.get_mut(shortcode) {
            Some(mut record) => {
                record.click_logs.push(ClickEntry {
                    timestamp: Utc::now(),
                    referrer: click.referrer,
                    geo_location: click.geo_location,
                });
                record.click_count += 1;
                tracing::debug!(
                    "Logged click for '{}' (total={})",
                    shortcode,
                    record.click_count
                );
            }
            None => tracing::warn!("append_click: shortcode '{}' not found", shortcode),
        }
        Ok(())
    }
}
