use async_trait::async_trait;
use log::{error, warn};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use gatekeeper_core::details::{DetailRepositoryTrait, FixedCost, RecurringService};
use gatekeeper_core::persistence::WriteOutcome;
use gatekeeper_core::remote::{Filter, RemoteQuery};
use gatekeeper_core::sync::{Row, SyncPayload};
use gatekeeper_core::{Error, Result};

use super::model::DetailMirror;
use crate::db::ConnectionManager;
use crate::repository::{from_rows, to_row, RepositoryBase};

const PARENT_COLUMN: &str = "transaction_id";

/// Detail rows of one collection, keyed by their parent transaction.
pub struct DetailRepository<T> {
    base: RepositoryBase,
    _rows: PhantomData<fn() -> T>,
}

pub type FixedCostRepository = DetailRepository<FixedCost>;
pub type RecurringServiceRepository = DetailRepository<RecurringService>;

impl<T: DetailMirror> DetailRepository<T> {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            base: RepositoryBase::new(manager, T::TABLE),
            _rows: PhantomData,
        }
    }

    fn table(&self) -> &'static str {
        T::TABLE.as_str()
    }

    fn bind(transaction_id: &str, rows: &[T]) -> Vec<T> {
        rows.iter().map(|row| row.for_insert(transaction_id)).collect()
    }

    fn insert_shapes(rows: &[T]) -> Result<Vec<Row>> {
        rows.iter().map(to_row).collect()
    }

    /// Representation rows from the remote store, or the bound input when the
    /// representation does not parse.
    fn stored_or(stored: Vec<Value>, bound: Vec<T>) -> Vec<T> {
        match from_rows::<T>(stored) {
            Ok(rows) if !rows.is_empty() => rows,
            _ => bound,
        }
    }

    async fn replace_local(&self, transaction_id: &str, rows: Vec<T>) {
        let parent = transaction_id.to_string();
        self.base
            .mirror_local(transaction_id, move |conn| {
                T::replace_local(conn, &parent, &rows)
            })
            .await;
    }

    /// Delete-then-insert against the remote store, restoring the previous
    /// set when the insert step fails.
    ///
    /// The remote table ends up holding either the new set or the original
    /// one. A failed insert surfaces as `Error::Integrity`.
    async fn replace_remote_children(&self, transaction_id: &str, bound: Vec<T>) -> Result<Vec<T>> {
        let remote = self.base.remote()?;
        let table = self.table();
        let by_parent = [Filter::eq(PARENT_COLUMN, transaction_id)];
        let new_rows = Self::insert_shapes(&bound)?;

        let snapshot = remote
            .select(
                table,
                &RemoteQuery::new()
                    .eq(PARENT_COLUMN, transaction_id)
                    .order("id", false),
            )
            .await?
            .rows;
        remote.delete(table, &by_parent).await?;

        if new_rows.is_empty() {
            return Ok(Vec::new());
        }

        match remote
            .insert(table, new_rows.into_iter().map(Value::Object).collect())
            .await
        {
            Ok(stored) => Ok(Self::stored_or(stored, bound)),
            Err(err) => {
                warn!(
                    "Insert into {} failed for {} after delete; restoring {} row(s)",
                    table,
                    transaction_id,
                    snapshot.len()
                );
                let restore: Vec<Value> = snapshot.into_iter().map(without_id).collect();
                if !restore.is_empty() {
                    if let Err(restore_err) = remote.insert(table, restore).await {
                        error!(
                            "Restore of {} for {} failed; remote set may be incomplete: {}",
                            table, transaction_id, restore_err
                        );
                    }
                }
                Err(Error::Integrity(format!(
                    "replace of {} for {} rolled back: {}",
                    table, transaction_id, err
                )))
            }
        }
    }
}

/// Server-assigned ids are regenerated on re-insert.
fn without_id(row: Value) -> Value {
    match row {
        Value::Object(mut object) => {
            object.remove("id");
            Value::Object(object)
        }
        other => other,
    }
}

#[async_trait]
impl<T: DetailMirror> DetailRepositoryTrait<T> for DetailRepository<T> {
    async fn get_by_transaction(&self, transaction_id: &str) -> Vec<T> {
        let table = self.table();
        let parent = transaction_id.to_string();
        let remote = self
            .base
            .remote_read("get_by_transaction", |remote| async move {
                let query = RemoteQuery::new().eq(PARENT_COLUMN, parent).order("id", false);
                let result = remote.select(table, &query).await?;
                Ok(Some(from_rows::<T>(result.rows)?))
            })
            .await;
        if let Some(rows) = remote {
            return rows;
        }

        let parent = transaction_id.to_string();
        self.base
            .local_read("get_by_transaction", move |conn| T::load_local(conn, &parent))
    }

    async fn replace_for_transaction(
        &self,
        transaction_id: &str,
        rows: Vec<T>,
    ) -> WriteOutcome<Vec<T>> {
        let bound = Self::bind(transaction_id, &rows);
        match self
            .replace_remote_children(transaction_id, bound.clone())
            .await
        {
            Ok(stored) => {
                self.replace_local(transaction_id, stored.clone()).await;
                WriteOutcome::Remote(stored)
            }
            Err(err) => {
                self.base
                    .log_remote_write_failure("replace", transaction_id, &err);
                self.queue_batch(transaction_id, bound).await
            }
        }
    }

    async fn create_batch(
        &self,
        transaction_id: &str,
        rows: Vec<T>,
    ) -> Result<WriteOutcome<Vec<T>>> {
        if rows.is_empty() {
            return Ok(WriteOutcome::Remote(Vec::new()));
        }
        let remote = match self.base.remote() {
            Ok(remote) => remote,
            Err(_) => return Ok(self.queue_batch(transaction_id, rows).await),
        };

        let bound = Self::bind(transaction_id, &rows);
        let new_rows = Self::insert_shapes(&bound)?;
        match remote
            .insert(
                self.table(),
                new_rows.into_iter().map(Value::Object).collect(),
            )
            .await
        {
            Ok(stored) => {
                let stored = Self::stored_or(stored, bound);
                self.replace_local(transaction_id, stored.clone()).await;
                Ok(WriteOutcome::Remote(stored))
            }
            Err(err) => {
                error!(
                    "Failed to insert {} row(s) into {} for {}: {}",
                    rows.len(),
                    self.table(),
                    transaction_id,
                    err
                );
                Err(Error::Integrity(format!(
                    "{} rows for {} were not created: {}",
                    self.table(),
                    transaction_id,
                    err
                )))
            }
        }
    }

    async fn queue_batch(&self, transaction_id: &str, rows: Vec<T>) -> WriteOutcome<Vec<T>> {
        let bound = Self::bind(transaction_id, &rows);
        self.replace_local(transaction_id, bound.clone()).await;
        match Self::insert_shapes(&bound) {
            Ok(shapes) => {
                self.base
                    .enqueue_pending(SyncPayload::Replace(shapes), transaction_id)
                    .await
            }
            Err(err) => error!(
                "Cannot encode {} rows for {}; not queued: {}",
                self.table(),
                transaction_id,
                err
            ),
        }
        WriteOutcome::Queued(bound)
    }

    async fn discard_for_transaction(&self, transaction_id: &str) {
        match self.base.remote() {
            Ok(remote) => {
                if let Err(err) = remote
                    .delete(self.table(), &[Filter::eq(PARENT_COLUMN, transaction_id)])
                    .await
                {
                    self.base
                        .log_remote_write_failure("delete", transaction_id, &err);
                }
            }
            Err(err) => self
                .base
                .log_remote_write_failure("delete", transaction_id, &err),
        }

        let parent = transaction_id.to_string();
        self.base
            .mirror_local(transaction_id, move |conn| {
                T::delete_local(conn, &parent).map(|_| ())
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use crate::schema_init::initialize_schema;
    use crate::sync::SyncQueueRepository;
    use gatekeeper_core::remote::RemoteStore;
    use gatekeeper_core::sync::SyncStatus;
    use gatekeeper_remote::{MemoryRemoteStore, RemoteVerb};
    use serde_json::json;
    use tempfile::tempdir;

    fn manager(remote: Option<Arc<MemoryRemoteStore>>) -> Arc<ConnectionManager> {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let db_path = init(&app_data).expect("init db");
        initialize_schema(&db_path).expect("schema");
        let remote = remote.map(|r| r as Arc<dyn RemoteStore>);
        Arc::new(ConnectionManager::with_remote(&db_path, remote).expect("manager"))
    }

    fn cost(categoria: &str) -> FixedCost {
        FixedCost {
            categoria: Some(categoria.to_string()),
            cantidad: Some(1.0),
            ..FixedCost::default()
        }
    }

    fn categories(rows: &[Value]) -> Vec<String> {
        let mut names: Vec<String> = rows
            .iter()
            .filter_map(|r| r["categoria"].as_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn failed_insert_restores_the_original_set() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.seed(
            "fixed_costs",
            vec![
                json!({"id": 1, "transaction_id": "T-2", "categoria": "antenna"}),
                json!({"id": 2, "transaction_id": "T-2", "categoria": "router"}),
                json!({"id": 3, "transaction_id": "T-9", "categoria": "other"}),
            ],
        );
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = FixedCostRepository::new(Arc::clone(&manager));

        remote.fail_next("fixed_costs", RemoteVerb::Insert, 1);
        let outcome = repo
            .replace_for_transaction("T-2", vec![cost("fiber")])
            .await;

        assert!(outcome.is_queued());
        let t2: Vec<Value> = remote
            .rows("fixed_costs")
            .into_iter()
            .filter(|r| r["transaction_id"] == "T-2")
            .collect();
        assert_eq!(categories(&t2), vec!["antenna", "router"]);
        assert_eq!(remote.rows("fixed_costs").len(), 3);

        let queued = SyncQueueRepository::new(manager)
            .list_by_status(SyncStatus::Pending)
            .expect("queue");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].operation, "replace");
        assert_eq!(queued[0].entity_id, "T-2");
    }

    #[tokio::test]
    async fn empty_replace_clears_without_restoring() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.seed(
            "fixed_costs",
            vec![json!({"id": 1, "transaction_id": "T-2", "categoria": "antenna"})],
        );
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = FixedCostRepository::new(Arc::clone(&manager));

        let outcome = repo.replace_for_transaction("T-2", Vec::new()).await;
        assert_eq!(outcome, WriteOutcome::Remote(Vec::new()));
        assert!(remote.rows("fixed_costs").is_empty());
        assert_eq!(remote.call_count("fixed_costs", RemoteVerb::Insert), 0);
        assert_eq!(manager.get_pending_sync_count(), 0);
    }

    #[tokio::test]
    async fn successful_replace_is_mirrored() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = FixedCostRepository::new(manager);

        let outcome = repo
            .replace_for_transaction("T-4", vec![cost("a"), cost("b")])
            .await;
        assert!(!outcome.is_queued());
        assert!(outcome.value().iter().all(|c| c.id.is_some()));

        remote.set_offline(true);
        let local = repo.get_by_transaction("T-4").await;
        assert_eq!(local.len(), 2);
        assert!(local.iter().all(|c| c.transaction_id.as_deref() == Some("T-4")));
    }

    #[tokio::test]
    async fn rejected_create_batch_is_an_integrity_error() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_next("recurring_services", RemoteVerb::Insert, 1);
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = RecurringServiceRepository::new(Arc::clone(&manager));

        let err = repo
            .create_batch("T-5", vec![RecurringService::default()])
            .await
            .expect_err("insert rejected");
        assert!(matches!(err, Error::Integrity(_)));
        assert_eq!(manager.get_pending_sync_count(), 0);

        remote.set_offline(true);
        assert!(repo.get_by_transaction("T-5").await.is_empty());
    }

    #[tokio::test]
    async fn offline_create_batch_is_queued_as_replace() {
        let manager = manager(None);
        let repo = RecurringServiceRepository::new(Arc::clone(&manager));
        let service = RecurringService {
            proveedor: Some("Claro".to_string()),
            ..RecurringService::default()
        };

        let outcome = repo
            .create_batch("T-6", vec![service])
            .await
            .expect("queued");
        assert!(outcome.is_queued());
        assert_eq!(repo.get_by_transaction("T-6").await.len(), 1);

        let queued = SyncQueueRepository::new(manager)
            .list_replayable(10)
            .expect("queue");
        let payload = SyncPayload::decode(&queued[0].operation, &queued[0].payload).expect("decode");
        match payload {
            SyncPayload::Replace(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["transaction_id"], "T-6");
                assert!(rows[0].get("id").is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
