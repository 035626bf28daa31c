//! Background loop that replays the sync queue against the remote store.

use futures::FutureExt;
use log::{debug, info, warn};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use gatekeeper_core::errors::{Error, Result};
use gatekeeper_core::remote::{Filter, RemoteStore};
use gatekeeper_core::sync::{
    SyncBackoff, SyncCycleOutcome, SyncPayload, SyncQueueEntry, SyncRetryClass, SyncStatus,
    SyncTable, SyncWorkerConfig,
};

use super::SyncQueueRepository;
use crate::db::ConnectionManager;

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SyncWorker {
    manager: Arc<ConnectionManager>,
    queue: SyncQueueRepository,
    config: SyncWorkerConfig,
    state: Mutex<Option<RunningLoop>>,
}

impl SyncWorker {
    pub fn new(manager: Arc<ConnectionManager>, config: SyncWorkerConfig) -> Self {
        let queue = SyncQueueRepository::with_max_retries(Arc::clone(&manager), config.max_retries);
        Self {
            manager,
            queue,
            config,
            state: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &SyncQueueRepository {
        &self.queue
    }

    /// Spawns the loop unless one is already running.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.state.lock().await;
        if let Some(running) = guard.as_ref() {
            if !running.handle.is_finished() {
                debug!("Sync worker already running");
                return;
            }
            guard.take();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.run_loop(stop_rx).await });
        *guard = Some(RunningLoop { stop_tx, handle });
        info!(
            "Sync worker started (interval {:?}, batch {})",
            self.config.base_interval, self.config.batch_size
        );
    }

    /// Signals the loop and waits for the current cycle to finish.
    ///
    /// In-flight remote calls are never aborted. If the loop does not exit
    /// within `stop_timeout` it is detached and left to finish on its own.
    pub async fn stop(&self) {
        let running = self.state.lock().await.take();
        let Some(RunningLoop { stop_tx, handle }) = running else {
            return;
        };

        let _ = stop_tx.send(true);
        match tokio::time::timeout(self.config.stop_timeout, handle).await {
            Ok(Ok(())) => info!("Sync worker stopped"),
            Ok(Err(err)) => warn!("Sync worker task ended abnormally: {}", err),
            Err(_) => warn!(
                "Sync worker did not stop within {:?}; detaching",
                self.config.stop_timeout
            ),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut backoff = SyncBackoff::from_config(&self.config);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(backoff.current()) => {}
                _ = stop_rx.changed() => break,
            }
            if *stop_rx.borrow() {
                break;
            }

            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(outcome)) if outcome.made_progress() => {
                    backoff.reset();
                }
                Ok(Ok(outcome)) => {
                    let next = backoff.record_idle();
                    debug!(
                        "Sync cycle idle (offline={}, selected={}, failed={}); next in {:?}",
                        outcome.skipped_offline, outcome.selected, outcome.failed, next
                    );
                }
                Ok(Err(err)) => {
                    let next = backoff.record_idle();
                    warn!("Sync cycle failed: {}; next in {:?}", err, next);
                }
                Err(_) => {
                    let next = backoff.record_idle();
                    warn!("Sync cycle panicked; next in {:?}", next);
                }
            }
        }
        debug!("Sync worker loop exited");
    }

    /// One drain pass over the oldest replayable rows.
    pub async fn run_cycle(&self) -> Result<SyncCycleOutcome> {
        let remote = match self.manager.remote() {
            Ok(remote) => remote,
            Err(_) => return Ok(SyncCycleOutcome::offline()),
        };

        let entries = self.queue.list_replayable(self.config.batch_size)?;
        let mut outcome = SyncCycleOutcome {
            selected: entries.len(),
            ..SyncCycleOutcome::default()
        };

        for entry in entries {
            match replay_entry(remote.as_ref(), &entry).await {
                Ok(()) => {
                    self.queue.mark_synced(entry.id).await?;
                    outcome.synced += 1;
                }
                Err(err) => {
                    let status = self.queue.mark_failed(entry.id, &err.to_string()).await?;
                    outcome.failed += 1;
                    if status == SyncStatus::PermanentlyFailed {
                        warn!(
                            "Sync entry {} ({} {}/{}) permanently failed: {}",
                            entry.id, entry.operation, entry.table_name, entry.entity_id, err
                        );
                    } else if err.retry_class() == SyncRetryClass::ReauthRequired {
                        warn!(
                            "Sync entry {} rejected by the remote store; check the API key: {}",
                            entry.id, err
                        );
                    } else {
                        debug!("Sync entry {} failed: {}", entry.id, err);
                    }
                }
            }
        }

        if outcome.selected > 0 {
            info!(
                "Sync cycle: {} selected, {} synced, {} failed",
                outcome.selected, outcome.synced, outcome.failed
            );
        }
        Ok(outcome)
    }
}

/// Replays one queue row. Any error is recorded against the row by the caller.
async fn replay_entry(remote: &dyn RemoteStore, entry: &SyncQueueEntry) -> Result<()> {
    let table: SyncTable = entry.table_name.parse().map_err(Error::Sync)?;
    let payload = SyncPayload::decode(&entry.operation, &entry.payload)?;
    let by_id = [Filter::eq("id", entry.entity_id.clone())];

    match payload {
        SyncPayload::Insert(row) => {
            remote.insert(table.as_str(), vec![Value::Object(row)]).await?;
        }
        SyncPayload::Update(row) | SyncPayload::UpdateStatus(row) => {
            let updated = remote
                .update(table.as_str(), &by_id, Value::Object(row))
                .await?;
            if updated.is_empty() {
                return Err(Error::Sync(format!(
                    "No remote row {}/{} to update",
                    table, entry.entity_id
                )));
            }
        }
        SyncPayload::Upsert(row) => {
            remote.upsert(table.as_str(), vec![Value::Object(row)]).await?;
        }
        SyncPayload::Replace(rows) => {
            let parent = table.parent_column().ok_or_else(|| {
                Error::Sync(format!("Table {} does not support replace", table))
            })?;
            remote
                .delete(table.as_str(), &[Filter::eq(parent, entry.entity_id.clone())])
                .await?;
            for row in rows {
                remote.insert(table.as_str(), vec![Value::Object(row)]).await?;
            }
        }
    }
    Ok(())
}
