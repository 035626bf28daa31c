use async_trait::async_trait;

use crate::persistence::WriteOutcome;
use crate::Result;

/// Repository for one detail collection keyed by `transaction_id`.
#[async_trait]
pub trait DetailRepositoryTrait<T>: Send + Sync {
    /// Rows for a transaction; empty on any failure.
    async fn get_by_transaction(&self, transaction_id: &str) -> Vec<T>;

    /// Replaces the full row set of a transaction.
    ///
    /// The remote side ends up holding either the complete new set or the
    /// complete original set. When the remote replace cannot be completed the
    /// new set is written locally and a `replace` entry is queued.
    async fn replace_for_transaction(&self, transaction_id: &str, rows: Vec<T>)
        -> WriteOutcome<Vec<T>>;

    /// Inserts the rows of a freshly created transaction.
    ///
    /// Fails with `Error::Integrity` when the remote store is reachable but
    /// rejects the insert, so the caller can roll back the header.
    async fn create_batch(&self, transaction_id: &str, rows: Vec<T>)
        -> Result<WriteOutcome<Vec<T>>>;

    /// Local write plus queued `replace`, without touching the remote store.
    async fn queue_batch(&self, transaction_id: &str, rows: Vec<T>) -> WriteOutcome<Vec<T>>;

    /// Best-effort removal of every row of a transaction from both stores.
    async fn discard_for_transaction(&self, transaction_id: &str);
}
