//! Scripted counter store for limiter tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{CounterStore, UpsertRequest};
use super::counter::CounterRow;
use crate::error::StoreError;

/// An upsert as the store received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpsert {
    pub key: String,
    pub points: i64,
    pub now: i64,
    pub fresh_expire: Option<i64>,
    pub block_expire: Option<i64>,
    pub max_points: i64,
}

/// A store that answers every read and write with a canned row.
///
/// Lets limiter tests pin exactly what the database reports back.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    reply: Mutex<Option<CounterRow>>,
    upserts: Mutex<Vec<RecordedUpsert>>,
    ensure_calls: AtomicUsize,
    fail_ensure: AtomicBool,
    fail_operations: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_with(&self, row: CounterRow) {
        *self.reply.lock() = Some(row);
    }

    pub fn fail_ensure_table(&self) {
        self.fail_ensure.store(true, Ordering::SeqCst);
    }

    pub fn fail_operations(&self) {
        self.fail_operations.store(true, Ordering::SeqCst);
    }

    pub fn ensure_table_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> Vec<RecordedUpsert> {
        self.upserts.lock().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_operations.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted failure".to_string()));
        }
        Ok(())
    }

    fn canned(&self) -> Result<CounterRow, StoreError> {
        self.check()?;
        (*self.reply.lock()).ok_or_else(|| StoreError::Unavailable("no scripted row".to_string()))
    }
}

#[async_trait]
impl CounterStore for ScriptedStore {
    async fn ensure_table(&self) -> Result<(), StoreError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ensure.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("cannot create table".to_string()));
        }
        Ok(())
    }

    async fn upsert(&self, request: &UpsertRequest<'_>) -> Result<CounterRow, StoreError> {
        self.upserts.lock().push(RecordedUpsert {
            key: request.key.to_string(),
            points: request.points,
            now: request.now,
            fresh_expire: request.fresh_expire,
            block_expire: request.block_expire,
            max_points: request.max_points,
        });
        self.canned()
    }

    async fn force_set(
        &self,
        _key: &str,
        points: i64,
        expire: Option<i64>,
    ) -> Result<CounterRow, StoreError> {
        self.check()?;
        Ok(CounterRow::new(points, expire))
    }

    async fn fetch(&self, _key: &str, _now: i64) -> Result<Option<CounterRow>, StoreError> {
        self.check()?;
        Ok(*self.reply.lock())
    }

    async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.reply.lock().take().is_some())
    }

    async fn clear_expired(&self, _before: i64) -> Result<u64, StoreError> {
        self.check()?;
        Ok(0)
    }
}
