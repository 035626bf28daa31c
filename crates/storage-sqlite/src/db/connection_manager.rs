//! Local store plus optional remote store, and the local batch state.

use async_trait::async_trait;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};

use gatekeeper_core::persistence::BatchWork;
use gatekeeper_core::remote::RemoteStore;
use gatekeeper_core::sync::SyncStatus;
use gatekeeper_core::{Error, LocalBatch, Result};
use gatekeeper_remote::PostgrestClient;

use super::{create_pool, spawn_writer, DbPool, WriteHandle};
use crate::schema::sync_queue;

type DeferredJob = Box<dyn FnOnce(&mut SqliteConnection) -> Result<()> + Send>;

tokio::task_local! {
    static ACTIVE_BATCH: Arc<DeferredWrites>;
}

/// Local writes parked by the batch of the current task.
#[derive(Default)]
struct DeferredWrites {
    jobs: Mutex<Vec<DeferredJob>>,
}

impl DeferredWrites {
    fn push(&self, job: DeferredJob) {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(job);
    }

    fn take(&self) -> Vec<DeferredJob> {
        std::mem::take(
            &mut *self
                .jobs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// Each deferred job that fails is logged and skipped; the rest still commit.
fn run_deferred(conn: &mut SqliteConnection, jobs: Vec<DeferredJob>) -> Result<()> {
    for job in jobs {
        if let Err(err) = job(conn) {
            error!("Deferred local write failed: {}", err);
        }
    }
    Ok(())
}

/// Settles one batch. If it is dropped unsettled (the batch future was
/// cancelled), the writes deferred so far go to the writer anyway.
struct BatchGuard {
    writes: Arc<DeferredWrites>,
    writer: WriteHandle,
    settled: bool,
}

impl BatchGuard {
    async fn finish(mut self, commit: bool) -> Result<()> {
        self.settled = true;
        let jobs = self.writes.take();
        if jobs.is_empty() {
            return Ok(());
        }
        if !commit {
            warn!("Discarding {} deferred local writes", jobs.len());
            return Ok(());
        }
        let total = jobs.len();
        self.writer
            .exec(move |conn| run_deferred(conn, jobs))
            .await?;
        debug!("Committed {} deferred local writes", total);
        Ok(())
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let jobs = self.writes.take();
        if jobs.is_empty() {
            return;
        }
        warn!(
            "Batch abandoned before commit; flushing {} deferred local writes",
            jobs.len()
        );
        self.writer.submit(move |conn| run_deferred(conn, jobs));
    }
}

/// Owns the local pool and writer, and the remote store when one is configured.
///
/// Being offline is not an error: `remote()` returns
/// `Error::RemoteNotInitialized`, which every repository treats as "go local".
pub struct ConnectionManager {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl ConnectionManager {
    /// Opens the local store and, when both values are non-empty, the remote client.
    pub fn new(remote_url: &str, remote_key: &str, db_path: &str) -> Result<Self> {
        let remote: Option<Arc<dyn RemoteStore>> =
            if remote_url.trim().is_empty() || remote_key.trim().is_empty() {
                info!("Remote store not configured; running offline");
                None
            } else {
                match PostgrestClient::new(remote_url, remote_key) {
                    Ok(client) => {
                        info!("Remote store configured at {}", remote_url.trim());
                        Some(Arc::new(client))
                    }
                    Err(err) => {
                        warn!("Remote client failed to initialize; running offline: {}", err);
                        None
                    }
                }
            };
        Self::with_remote(db_path, remote)
    }

    pub fn with_remote(db_path: &str, remote: Option<Arc<dyn RemoteStore>>) -> Result<Self> {
        let pool = create_pool(db_path)?;
        let writer = spawn_writer(pool.as_ref().clone());
        Ok(Self {
            pool,
            writer,
            remote,
        })
    }

    pub fn is_online(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote(&self) -> Result<Arc<dyn RemoteStore>> {
        self.remote.clone().ok_or(Error::RemoteNotInitialized)
    }

    pub fn pool(&self) -> Arc<DbPool> {
        Arc::clone(&self.pool)
    }

    pub fn writer(&self) -> WriteHandle {
        self.writer.clone()
    }

    /// True while the current task is inside `run_batch`.
    pub fn batch_active(&self) -> bool {
        ACTIVE_BATCH.try_with(|_| ()).is_ok()
    }

    /// Runs a local write now, or defers it to the current task's batch.
    pub async fn write_local<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<()> + Send + 'static,
    {
        if let Ok(writes) = ACTIVE_BATCH.try_with(Arc::clone) {
            writes.push(Box::new(job));
            return Ok(());
        }
        self.writer.exec(job).await
    }

    /// Rows still waiting for the remote store (`pending` and `failed`).
    /// Status display helper: never waits for a connection, `0` on any error.
    pub fn get_pending_sync_count(&self) -> i64 {
        let Some(mut conn) = self.pool.try_get() else {
            debug!("No idle local connection; pending sync count skipped");
            return 0;
        };
        let count = sync_queue::table
            .filter(sync_queue::status.eq_any(replayable_statuses()))
            .select(count_star())
            .first::<i64>(&mut conn);
        match count {
            Ok(count) => count,
            Err(err) => {
                debug!("Pending sync count unavailable: {}", err);
                0
            }
        }
    }
}

fn replayable_statuses() -> Vec<&'static str> {
    SyncStatus::replayable().iter().map(|s| s.as_str()).collect()
}

#[async_trait]
impl LocalBatch for ConnectionManager {
    async fn run_batch<'a>(&'a self, work: BatchWork<'a>) -> Result<()> {
        if self.batch_active() {
            return work.await;
        }

        let writes = Arc::new(DeferredWrites::default());
        let guard = BatchGuard {
            writes: Arc::clone(&writes),
            writer: self.writer(),
            settled: false,
        };
        let result = ACTIVE_BATCH.scope(writes, work).await;
        guard.finish(result.is_ok()).await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use crate::schema_init::initialize_schema;
    use crate::errors::StorageError;
    use gatekeeper_remote::MemoryRemoteStore;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;
    use tokio::sync::oneshot;

    fn db_path() -> String {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let db_path = init(&app_data).expect("init db");
        initialize_schema(&db_path).expect("schema");
        db_path
    }

    fn insert_queue_row(
        status: &'static str,
    ) -> impl FnOnce(&mut SqliteConnection) -> Result<()> + Send + 'static {
        move |conn| {
            diesel::insert_into(sync_queue::table)
                .values((
                    sync_queue::table_name.eq("transactions"),
                    sync_queue::operation.eq("insert"),
                    sync_queue::entity_id.eq("T-1"),
                    sync_queue::payload.eq("{}"),
                    sync_queue::status.eq(status),
                    sync_queue::created_at.eq("2026-01-01T00:00:00.000000Z"),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
            Ok(())
        }
    }

    #[test]
    fn empty_credentials_mean_offline() {
        let manager = ConnectionManager::new("", "", &db_path()).expect("manager");
        assert!(!manager.is_online());
        assert!(matches!(manager.remote(), Err(Error::RemoteNotInitialized)));

        let manager = ConnectionManager::new("not a url", "key", &db_path()).expect("manager");
        assert!(!manager.is_online());
    }

    #[test]
    fn injected_remote_is_online() {
        let remote: Arc<dyn RemoteStore> = Arc::new(MemoryRemoteStore::new());
        let manager = ConnectionManager::with_remote(&db_path(), Some(remote)).expect("manager");
        assert!(manager.is_online());
        assert!(manager.remote().is_ok());
    }

    #[tokio::test]
    async fn nested_batch_commits_once_when_outer_work_finishes() {
        let manager = ConnectionManager::with_remote(&db_path(), None).expect("manager");

        manager
            .run_batch(Box::pin(async {
                manager.write_local(insert_queue_row("pending")).await?;
                manager
                    .run_batch(Box::pin(async {
                        manager.write_local(insert_queue_row("failed")).await
                    }))
                    .await?;
                assert!(manager.batch_active());
                assert_eq!(manager.get_pending_sync_count(), 0);
                Ok::<(), Error>(())
            }))
            .await
            .expect("batch");

        assert!(!manager.batch_active());
        assert_eq!(manager.get_pending_sync_count(), 2);
    }

    #[tokio::test]
    async fn failed_batch_discards_deferred_writes() {
        let manager = ConnectionManager::with_remote(&db_path(), None).expect("manager");
        let result = manager
            .run_batch(Box::pin(async {
                manager.write_local(insert_queue_row("pending")).await?;
                Err(Error::Sync("detail replace failed".to_string()))
            }))
            .await;
        assert!(matches!(result, Err(Error::Sync(_))));
        assert!(!manager.batch_active());
        assert_eq!(manager.get_pending_sync_count(), 0);

        manager
            .write_local(insert_queue_row("pending"))
            .await
            .expect("direct write");
        assert_eq!(manager.get_pending_sync_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_batch_flushes_and_stops_deferring() {
        let manager = ConnectionManager::with_remote(&db_path(), None).expect("manager");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            manager.run_batch(Box::pin(async {
                manager.write_local(insert_queue_row("pending")).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), Error>(())
            })),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!manager.batch_active());

        // Goes through the writer after the flushed batch.
        manager
            .write_local(insert_queue_row("failed"))
            .await
            .expect("direct write");
        assert_eq!(manager.get_pending_sync_count(), 2);
    }

    #[tokio::test]
    async fn writes_from_other_tasks_skip_an_open_batch() {
        let manager = Arc::new(ConnectionManager::with_remote(&db_path(), None).expect("manager"));
        let (opened_tx, opened_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let batch_owner = Arc::clone(&manager);
        let holder = tokio::spawn(async move {
            batch_owner
                .run_batch(Box::pin(async {
                    batch_owner
                        .write_local(insert_queue_row("pending"))
                        .await?;
                    let _ = opened_tx.send(());
                    let _ = release_rx.await;
                    Ok::<(), Error>(())
                }))
                .await
        });

        opened_rx.await.expect("batch opened");
        assert!(!manager.batch_active());
        manager
            .write_local(insert_queue_row("failed"))
            .await
            .expect("direct write");
        assert_eq!(manager.get_pending_sync_count(), 1);

        release_tx.send(()).expect("release");
        holder.await.expect("join").expect("batch");
        assert_eq!(manager.get_pending_sync_count(), 2);
    }

    #[tokio::test]
    async fn pending_count_does_not_wait_for_a_busy_pool() {
        let manager = ConnectionManager::with_remote(&db_path(), None).expect("manager");
        manager
            .write_local(insert_queue_row("pending"))
            .await
            .expect("write");

        let pool = manager.pool();
        let mut held = Vec::new();
        while let Some(conn) = pool.try_get() {
            held.push(conn);
        }

        let started = Instant::now();
        assert_eq!(manager.get_pending_sync_count(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));

        drop(held);
        assert_eq!(manager.get_pending_sync_count(), 1);
    }

    #[test]
    fn pending_count_is_zero_without_schema() {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let db_path = init(&app_data).expect("init db");
        let manager = ConnectionManager::with_remote(&db_path, None).expect("manager");
        assert_eq!(manager.get_pending_sync_count(), 0);
    }
}
