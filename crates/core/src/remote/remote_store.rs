use async_trait::async_trait;
use serde_json::Value;

use super::{Filter, RemoteQuery, RemoteRows};
use crate::Result;

/// Table-scoped CRUD against the authoritative remote store.
///
/// Rows travel as JSON objects keyed by column name. Implementations must be
/// safe to share across tasks; every call is independent.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: &str, query: &RemoteQuery) -> Result<RemoteRows>;

    /// Inserts all rows in one request and returns them as stored.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>>;

    /// Applies `patch` to every row matching `filters`; returns the updated rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;

    /// Inserts or merges rows by primary key.
    async fn upsert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>>;

    /// Deletes every row matching `filters`; returns the deleted rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>>;
}
