//! Repository for the `sync_queue` table.

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::warn;
use std::sync::Arc;

use gatekeeper_core::errors::Result;
use gatekeeper_core::sync::{
    attempt_message, recorded_attempts, status_after_attempt, SyncOperation, SyncPayload,
    SyncQueueEntry, SyncStatus, SyncTable, SYNC_MAX_RETRIES,
};

use crate::db::{get_connection, ConnectionManager};
use crate::errors::StorageError;
use crate::repository::now_timestamp;
use crate::schema::sync_queue;

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::sync_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncQueueEntryDB {
    pub id: i64,
    pub table_name: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
    pub attempted_at: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::sync_queue)]
struct NewSyncQueueEntryDB<'a> {
    table_name: &'a str,
    operation: &'a str,
    entity_id: &'a str,
    payload: &'a str,
    status: &'a str,
    created_at: String,
}

impl From<SyncQueueEntryDB> for SyncQueueEntry {
    fn from(row: SyncQueueEntryDB) -> Self {
        let status = row.status.parse().unwrap_or_else(|err| {
            warn!("Sync queue row {}: {}; treating as failed", row.id, err);
            SyncStatus::Failed
        });
        Self {
            id: row.id,
            table_name: row.table_name,
            operation: row.operation,
            entity_id: row.entity_id,
            payload: row.payload,
            status,
            created_at: row.created_at,
            attempted_at: row.attempted_at,
            error_message: row.error_message,
        }
    }
}

/// Inserts a `pending` row inside the caller's transaction.
pub(crate) fn insert_queue_entry(
    conn: &mut SqliteConnection,
    table: SyncTable,
    entity_id: &str,
    operation: SyncOperation,
    payload: &str,
) -> Result<i64> {
    let row = NewSyncQueueEntryDB {
        table_name: table.as_str(),
        operation: operation.as_str(),
        entity_id,
        payload,
        status: SyncStatus::Pending.as_str(),
        created_at: now_timestamp(),
    };
    let id = diesel::insert_into(sync_queue::table)
        .values(&row)
        .returning(sync_queue::id)
        .get_result::<i64>(conn)
        .map_err(StorageError::from)?;
    Ok(id)
}

fn replayable_statuses() -> Vec<&'static str> {
    SyncStatus::replayable().iter().map(|s| s.as_str()).collect()
}

pub struct SyncQueueRepository {
    manager: Arc<ConnectionManager>,
    max_retries: u32,
}

impl SyncQueueRepository {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self::with_max_retries(manager, SYNC_MAX_RETRIES)
    }

    pub fn with_max_retries(manager: Arc<ConnectionManager>, max_retries: u32) -> Self {
        Self {
            manager,
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn enqueue(
        &self,
        table: SyncTable,
        entity_id: &str,
        payload: &SyncPayload,
    ) -> Result<i64> {
        let operation = payload.operation();
        let encoded = payload.encode()?;
        let entity_id = entity_id.to_string();
        self.manager
            .writer()
            .exec(move |conn| insert_queue_entry(conn, table, &entity_id, operation, &encoded))
            .await
    }

    /// Oldest-first rows a drain cycle may replay (`pending` and `failed`).
    pub fn list_replayable(&self, limit: i64) -> Result<Vec<SyncQueueEntry>> {
        let mut conn = get_connection(&self.manager.pool())?;
        let rows = sync_queue::table
            .filter(sync_queue::status.eq_any(replayable_statuses()))
            .order((sync_queue::created_at.asc(), sync_queue::id.asc()))
            .limit(limit)
            .select(SyncQueueEntryDB::as_select())
            .load::<SyncQueueEntryDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(SyncQueueEntry::from).collect())
    }

    pub async fn mark_synced(&self, entry_id: i64) -> Result<()> {
        self.manager
            .writer()
            .exec(move |conn| {
                diesel::update(sync_queue::table.find(entry_id))
                    .set((
                        sync_queue::status.eq(SyncStatus::Synced.as_str()),
                        sync_queue::attempted_at.eq(Some(now_timestamp())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Records a failed replay attempt and returns the row's new status.
    ///
    /// The attempt count lives in `error_message` as `"Attempt N: ..."`; the
    /// row turns `permanently_failed` once it reaches the retry ceiling.
    pub async fn mark_failed(&self, entry_id: i64, message: &str) -> Result<SyncStatus> {
        let max_retries = self.max_retries;
        let reason = message.to_string();
        self.manager
            .writer()
            .exec(move |conn| {
                let previous = sync_queue::table
                    .find(entry_id)
                    .select(sync_queue::error_message)
                    .first::<Option<String>>(conn)
                    .map_err(StorageError::from)?;
                let attempt = recorded_attempts(previous.as_deref()) + 1;
                let status = status_after_attempt(attempt, max_retries);

                diesel::update(sync_queue::table.find(entry_id))
                    .set((
                        sync_queue::status.eq(status.as_str()),
                        sync_queue::attempted_at.eq(Some(now_timestamp())),
                        sync_queue::error_message.eq(Some(attempt_message(attempt, &reason))),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(status)
            })
            .await
    }

    /// Rows not yet confirmed by the remote store.
    pub fn pending_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.manager.pool())?;
        let count = sync_queue::table
            .filter(sync_queue::status.eq_any(replayable_statuses()))
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count)
    }

    pub fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SyncQueueEntry>> {
        let mut conn = get_connection(&self.manager.pool())?;
        let rows = sync_queue::table
            .filter(sync_queue::status.eq(status.as_str()))
            .order((sync_queue::created_at.asc(), sync_queue::id.asc()))
            .select(SyncQueueEntryDB::as_select())
            .load::<SyncQueueEntryDB>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(SyncQueueEntry::from).collect())
    }

    pub fn get(&self, entry_id: i64) -> Result<Option<SyncQueueEntry>> {
        let mut conn = get_connection(&self.manager.pool())?;
        let row = sync_queue::table
            .find(entry_id)
            .select(SyncQueueEntryDB::as_select())
            .first::<SyncQueueEntryDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(SyncQueueEntry::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use crate::schema_init::initialize_schema;
    use serde_json::json;
    use tempfile::tempdir;

    fn setup() -> SyncQueueRepository {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let db_path = init(&app_data).expect("init db");
        initialize_schema(&db_path).expect("schema");
        let manager = Arc::new(ConnectionManager::with_remote(&db_path, None).expect("manager"));
        SyncQueueRepository::new(manager)
    }

    fn insert_payload(id: &str) -> SyncPayload {
        SyncPayload::row(SyncOperation::Insert, json!({ "id": id })).expect("payload")
    }

    #[tokio::test]
    async fn replayable_rows_come_back_oldest_first() {
        let queue = setup();
        let first = queue
            .enqueue(SyncTable::Transactions, "T-1", &insert_payload("T-1"))
            .await
            .expect("enqueue");
        let second = queue
            .enqueue(SyncTable::Transactions, "T-2", &insert_payload("T-2"))
            .await
            .expect("enqueue");

        let rows = queue.list_replayable(50).expect("list");
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(rows[0].status, SyncStatus::Pending);
        assert_eq!(rows[0].operation, "insert");
        assert_eq!(queue.pending_count().expect("count"), 2);

        queue.mark_synced(first).await.expect("synced");
        let rows = queue.list_replayable(50).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_id, "T-2");
        assert_eq!(queue.list_by_status(SyncStatus::Synced).expect("synced").len(), 1);
    }

    #[tokio::test]
    async fn fifth_failure_is_terminal_and_never_replayed() {
        let queue = setup();
        let id = queue
            .enqueue(SyncTable::Transactions, "T-9", &insert_payload("T-9"))
            .await
            .expect("enqueue");

        for attempt in 1..=4 {
            let status = queue.mark_failed(id, "remote down").await.expect("fail");
            assert_eq!(status, SyncStatus::Failed, "attempt {attempt}");
            assert_eq!(queue.list_replayable(50).expect("list").len(), 1);
        }
        let status = queue.mark_failed(id, "remote down").await.expect("fail");
        assert_eq!(status, SyncStatus::PermanentlyFailed);

        let entry = queue.get(id).expect("get").expect("row");
        assert_eq!(entry.error_message.as_deref(), Some("Attempt 5: remote down"));
        assert!(entry.attempted_at.is_some());
        assert!(queue.list_replayable(50).expect("list").is_empty());
        assert_eq!(queue.pending_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn missing_row_cannot_be_marked_failed() {
        let queue = setup();
        assert!(queue.mark_failed(404, "gone").await.is_err());
        assert!(queue.get(404).expect("get").is_none());
    }
}
