//! In-process counter store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::ratelimit::{CounterRow, CounterStore, UpsertRequest};

/// A counter store keeping rows in a concurrent map.
///
/// Writes to one key are serialized by the map's shard lock, giving the same
/// per-key atomicity the relational stores get from the row lock. State is
/// lost with the process and is not shared between instances.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: DashMap<String, CounterRow>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, including expired ones not yet cleared.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<CounterRow, StoreError> {
        let row = match self.rows.entry(request.key.to_string()) {
            Entry::Occupied(mut entry) => {
                let row = request.apply(Some(*entry.get()));
                entry.insert(row);
                row
            }
            Entry::Vacant(entry) => *entry.insert(request.apply(None)),
        };

        Ok(row)
    }

    async fn force_set(
        &self,
        key: &str,
        points: i64,
        expire: Option<i64>,
    ) -> Result<CounterRow, StoreError> {
        let row = CounterRow::new(points, expire);
        self.rows.insert(key.to_string(), row);
        Ok(row)
    }

    async fn fetch(&self, key: &str, now: i64) -> Result<Option<CounterRow>, StoreError> {
        Ok(self
            .rows
            .get(key)
            .map(|row| *row)
            .filter(|row| !row.is_expired(now)))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.rows.remove(key).is_some())
    }

    async fn clear_expired(&self, before: i64) -> Result<u64, StoreError> {
        let mut removed = 0;
        self.rows.retain(|_, row| {
            let expired = matches!(row.expire, Some(expire) if expire < before);
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }
}
