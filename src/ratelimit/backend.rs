//! Counter store trait for abstracting the persistence back ends.

use async_trait::async_trait;

use super::counter::CounterRow;
use crate::error::StoreError;

/// Parameters of one atomic consume-style write.
///
/// The store resolves, in a single operation, whether the existing row is
/// absent or stale (start a fresh window) or active (add to it), and whether
/// this write pushes the key over its budget (apply the block expiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertRequest<'a> {
    /// Storage key of the row
    pub key: &'a str,
    /// Points to add; negative for rewards
    pub points: i64,
    /// Clock reading the write is evaluated against, epoch milliseconds
    pub now: i64,
    /// Expiry given to a freshly started window
    pub fresh_expire: Option<i64>,
    /// Expiry applied when this write crosses `max_points`
    pub block_expire: Option<i64>,
    /// Configured budget per window
    pub max_points: i64,
}

impl<'a> UpsertRequest<'a> {
    /// The expiry the row receives when this write starts a new window.
    ///
    /// A fresh window that is already over budget starts out blocked.
    pub fn expire_for_fresh_window(&self) -> Option<i64> {
        match self.block_expire {
            Some(block) if self.points > self.max_points => Some(block),
            _ => self.fresh_expire,
        }
    }

    /// Whether moving from `previous` points crosses the budget and blocks.
    pub fn crosses_budget(&self, previous: i64) -> bool {
        self.block_expire.is_some()
            && previous <= self.max_points
            && previous.saturating_add(self.points) > self.max_points
    }

    /// The row this write leaves behind, given the row it found.
    ///
    /// Stores that cannot express the write as one statement apply this under
    /// their own per-key exclusion.
    pub fn apply(&self, existing: Option<CounterRow>) -> CounterRow {
        match existing {
            Some(row) if !row.is_expired(self.now) => {
                let expire = if self.crosses_budget(row.points) {
                    self.block_expire
                } else {
                    row.expire
                };
                CounterRow::new(row.points.saturating_add(self.points), expire)
            }
            _ => CounterRow::new(self.points, self.expire_for_fresh_window()),
        }
    }
}

/// Trait for counter store implementations.
///
/// Every method is a single round trip. Implementations must make `upsert`
/// atomic with respect to concurrent callers on the same key, including
/// callers in other processes sharing the store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Create the counter table if it does not exist.
    async fn ensure_table(&self) -> Result<(), StoreError>;

    /// Apply a consume-style write and return the row as it now stands.
    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<CounterRow, StoreError>;

    /// Overwrite the row for `key` unconditionally.
    async fn force_set(
        &self,
        key: &str,
        points: i64,
        expire: Option<i64>,
    ) -> Result<CounterRow, StoreError>;

    /// Read the row for `key`, treating a row expired at `now` as absent.
    async fn fetch(&self, key: &str, now: i64) -> Result<Option<CounterRow>, StoreError>;

    /// Remove the row for `key`. Returns whether a row was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove rows that expired before `before`. Returns how many were removed.
    async fn clear_expired(&self, before: i64) -> Result<u64, StoreError>;
}
