//! Persistent fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use super::backend::{CounterStore, UpsertRequest};
use super::counter::{now_ms, CounterRow, RateLimiterRes};
use super::descriptor::StorageKey;
use super::options::{secs_to_ms, LimiterOptions};
use super::schema::SchemaGuardian;
use crate::error::{Result, TollboothError};

/// How long an expired row is kept before the purge task removes it.
const EXPIRED_ROW_RETENTION_MS: i64 = 3_600_000;

/// A fixed-window rate limiter whose counters live in a shared store.
///
/// Holds no lock across operations. Every operation is one round trip to
/// the store, and concurrent callers on the same key, in this process or
/// any other, are serialized by the store's atomic upsert.
pub struct PersistentRateLimiter<S: CounterStore + 'static> {
    /// The counter store
    store: Arc<S>,
    /// Limiter configuration
    options: LimiterOptions,
    /// Tracks whether the counter table exists
    schema: SchemaGuardian,
    /// Background purge of long-expired rows
    cleanup: Option<JoinHandle<()>>,
}

impl<S: CounterStore + 'static> PersistentRateLimiter<S> {
    /// Create a limiter, preparing the counter table first.
    ///
    /// Fails with [`TollboothError::Schema`] when the table cannot be
    /// created. This is not retried.
    pub async fn new(options: LimiterOptions, store: S) -> Result<Self> {
        Self::with_shared_store(options, Arc::new(store)).await
    }

    /// Create a limiter over a store shared with other limiters.
    pub async fn with_shared_store(options: LimiterOptions, store: Arc<S>) -> Result<Self> {
        options.validate()?;

        let schema = if options.table_created {
            SchemaGuardian::already_created()
        } else {
            SchemaGuardian::new()
        };

        schema.ensure_ready(store.as_ref()).await.map_err(|e| {
            error!(error = %e, table = %options.table_name, "Failed to prepare counter table");
            TollboothError::Schema(e)
        })?;

        let cleanup = (options.clear_expired_interval_secs > 0).then(|| {
            spawn_cleanup(
                store.clone(),
                Duration::from_secs(options.clear_expired_interval_secs),
            )
        });

        info!(
            points = options.points,
            duration = options.duration,
            block_duration = options.block_duration,
            key_prefix = %options.key_prefix,
            table = %options.table_name,
            "Rate limiter initialized"
        );

        Ok(Self {
            store,
            options,
            schema,
            cleanup,
        })
    }

    /// Spend `points` for `key` in the current window.
    ///
    /// Fails with [`TollboothError::OverLimit`] carrying the derived result
    /// when the window total exceeds the configured budget.
    pub async fn consume(&self, key: &str, points: u32) -> Result<RateLimiterRes> {
        let key = self.storage_key(key);
        trace!(key = %key, points = points, "Consuming points");

        let now = now_ms();
        let requested = i64::from(points);
        let row = self
            .write(UpsertRequest {
                key: key.as_str(),
                points: requested,
                now,
                fresh_expire: self.options.window_expire(now),
                block_expire: self.options.block_expire(now),
                max_points: self.max_points(),
            })
            .await?;

        let mut res = self.derive(requested, &row, now);

        if res.is_first_in_duration {
            debug!(key = %key, expire = ?row.expire, "Started new window");
        }

        if row.points > self.max_points() {
            if self.crossed_budget(requested, &row) {
                let block_ms = self.options.block_duration_ms() as u64;
                res.ms_before_next = res.ms_before_next.max(block_ms);
            }

            debug!(
                key = %key,
                caller = key.caller_key(&self.options.key_prefix),
                consumed = row.points,
                limit = self.options.points,
                ms_before_next = res.ms_before_next,
                "Rate limit exceeded"
            );
            return Err(TollboothError::OverLimit(res));
        }

        Ok(res)
    }

    /// Read the current window for `key` without changing it.
    ///
    /// Returns `None` when the key has no live window.
    pub async fn get(&self, key: &str) -> Result<Option<RateLimiterRes>> {
        let key = self.storage_key(key);
        self.ready().await?;

        let now = now_ms();
        let row = self.store.fetch(key.as_str(), now).await?;
        trace!(key = %key, found = row.is_some(), "Read counter");

        Ok(row.map(|row| self.derive(0, &row, now)))
    }

    /// Remove the counter for `key`. Returns whether one existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = self.storage_key(key);
        self.ready().await?;

        let removed = self.store.delete(key.as_str()).await?;
        debug!(key = %key, removed = removed, "Deleted counter");

        Ok(removed)
    }

    /// Add `points` to `key` without enforcing the budget.
    pub async fn penalty(&self, key: &str, points: u32) -> Result<RateLimiterRes> {
        self.adjust(key, i64::from(points)).await
    }

    /// Give `points` back to `key`.
    pub async fn reward(&self, key: &str, points: u32) -> Result<RateLimiterRes> {
        self.adjust(key, -i64::from(points)).await
    }

    /// Deny `key` for `secs` seconds; 0 blocks it until deleted.
    pub async fn block(&self, key: &str, secs: u64) -> Result<RateLimiterRes> {
        let points = self.max_points() + 1;
        let res = self.force(key, points, secs).await?;
        debug!(key = %key, secs = secs, "Blocked key");
        Ok(res)
    }

    /// Overwrite the counter for `key` with `points` lasting `secs` seconds.
    ///
    /// A zero `secs` leaves the row without expiry.
    pub async fn set(&self, key: &str, points: u32, secs: u64) -> Result<RateLimiterRes> {
        self.force(key, i64::from(points), secs).await
    }

    /// Remove rows that expired before `before` (epoch milliseconds).
    pub async fn clear_expired(&self, before: i64) -> Result<u64> {
        self.ready().await?;
        Ok(self.store.clear_expired(before).await?)
    }

    /// The limiter configuration.
    pub fn options(&self) -> &LimiterOptions {
        &self.options
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Derive the caller-facing result for a row.
    pub fn derive(&self, requested: i64, row: &CounterRow, now: i64) -> RateLimiterRes {
        RateLimiterRes::from_row(self.options.points, requested, row, now)
    }

    async fn adjust(&self, key: &str, delta: i64) -> Result<RateLimiterRes> {
        let key = self.storage_key(key);
        trace!(key = %key, delta = delta, "Adjusting points");

        let now = now_ms();
        let row = self
            .write(UpsertRequest {
                key: key.as_str(),
                points: delta,
                now,
                fresh_expire: self.options.window_expire(now),
                block_expire: None,
                max_points: self.max_points(),
            })
            .await?;

        Ok(self.derive(delta, &row, now))
    }

    async fn force(&self, key: &str, points: i64, secs: u64) -> Result<RateLimiterRes> {
        let key = self.storage_key(key);
        let now = now_ms();
        let expire = match secs {
            0 => None,
            secs => Some(now.saturating_add(secs_to_ms("secs", secs)?)),
        };

        self.ready().await?;
        let row = self.store.force_set(key.as_str(), points, expire).await?;

        Ok(self.derive(points, &row, now))
    }

    async fn write(&self, request: UpsertRequest<'_>) -> Result<CounterRow> {
        self.ready().await?;
        Ok(self.store.upsert(&request).await?)
    }

    async fn ready(&self) -> Result<()> {
        Ok(self.schema.ensure_ready(self.store.as_ref()).await?)
    }

    fn storage_key(&self, key: &str) -> StorageKey {
        StorageKey::new(&self.options.key_prefix, key)
    }

    /// Whether this consume pushed the key over budget with blocking enabled.
    ///
    /// The reset is then at least a full block, whatever expiry the store
    /// reported back.
    fn crossed_budget(&self, requested: i64, row: &CounterRow) -> bool {
        self.options.block_duration > 0
            && row.points > self.max_points()
            && row.points.saturating_sub(requested) <= self.max_points()
    }

    fn max_points(&self) -> i64 {
        i64::from(self.options.points)
    }
}

impl<S: CounterStore + 'static> Drop for PersistentRateLimiter<S> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
            debug!("Stopped expired row cleanup");
        }
    }
}

impl<S: CounterStore + 'static> std::fmt::Debug for PersistentRateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentRateLimiter")
            .field("options", &self.options)
            .field("schema", &self.schema)
            .finish()
    }
}

fn spawn_cleanup<S: CounterStore + 'static>(store: Arc<S>, period: Duration) -> JoinHandle<()> {
    info!(period_secs = period.as_secs(), "Starting expired row cleanup");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let cutoff = now_ms() - EXPIRED_ROW_RETENTION_MS;
            match store.clear_expired(cutoff).await {
                Ok(removed) => debug!(removed = removed, "Purged expired counters"),
                Err(e) => warn!(error = %e, "Failed to purge expired counters"),
            }
        }
    })
}
