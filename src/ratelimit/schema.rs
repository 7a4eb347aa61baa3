//! One-time preparation of the counter table.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::backend::CounterStore;
use crate::error::StoreError;

/// Ensures the counter table exists before the ledger touches it.
///
/// The table is created at most once per limiter; after the first success
/// every check is a flag read.
#[derive(Debug, Default)]
pub struct SchemaGuardian {
    created: AtomicBool,
}

impl SchemaGuardian {
    /// Create a guardian that has not yet prepared the table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a guardian for a table provisioned elsewhere.
    pub fn already_created() -> Self {
        Self {
            created: AtomicBool::new(true),
        }
    }

    /// Whether the table is known to exist.
    pub fn is_ready(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// Create the table unless a previous call already did.
    ///
    /// Two callers racing before the first success may both issue the
    /// create statement; it is idempotent on the store side.
    pub async fn ensure_ready<S>(&self, store: &S) -> Result<(), StoreError>
    where
        S: CounterStore + ?Sized,
    {
        if self.is_ready() {
            return Ok(());
        }

        store.ensure_table().await?;
        self.created.store(true, Ordering::Release);
        debug!("Counter table ready");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::testing::ScriptedStore;

    #[tokio::test]
    async fn test_ensure_ready_runs_once() {
        let store = ScriptedStore::new();
        let guardian = SchemaGuardian::new();
        assert!(!guardian.is_ready());

        guardian.ensure_ready(&store).await.unwrap();
        guardian.ensure_ready(&store).await.unwrap();

        assert!(guardian.is_ready());
        assert_eq!(store.ensure_table_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_guardian_unready() {
        let store = ScriptedStore::new();
        store.fail_ensure_table();
        let guardian = SchemaGuardian::new();

        assert!(guardian.ensure_ready(&store).await.is_err());
        assert!(!guardian.is_ready());
        assert!(guardian.ensure_ready(&store).await.is_err());
        assert_eq!(store.ensure_table_calls(), 2);
    }

    #[tokio::test]
    async fn test_already_created_skips_store() {
        let store = ScriptedStore::new();
        let guardian = SchemaGuardian::already_created();

        guardian.ensure_ready(&store).await.unwrap();
        assert_eq!(store.ensure_table_calls(), 0);
    }
}
