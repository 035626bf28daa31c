//! Shared read/write primitives composed by every entity repository.
//!
//! Reads go remote-first and fall back to the local mirror; writes go to the
//! local mirror unconditionally and to the sync queue when the remote store
//! did not take them. None of these helpers return an error to the caller.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::sqlite::SqliteConnection;
use log::{debug, error, info, warn};
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use gatekeeper_core::remote::RemoteStore;
use gatekeeper_core::sync::{Row, SyncPayload, SyncTable};
use gatekeeper_core::{Error, Result};

use crate::db::{get_connection, ConnectionManager};
use crate::sync::insert_queue_entry;

pub struct RepositoryBase {
    manager: Arc<ConnectionManager>,
    table: SyncTable,
}

impl RepositoryBase {
    pub fn new(manager: Arc<ConnectionManager>, table: SyncTable) -> Self {
        Self { manager, table }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn table(&self) -> SyncTable {
        self.table
    }

    pub fn remote(&self) -> Result<Arc<dyn RemoteStore>> {
        self.manager.remote()
    }

    /// Runs a remote read. `None` means "use the local mirror": offline, the
    /// remote call failed, or the remote had nothing for this key.
    pub async fn remote_read<T, F, Fut>(&self, context: &str, read: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let remote = match self.manager.remote() {
            Ok(remote) => remote,
            Err(_) => {
                debug!("Offline; {} served from local {}", context, self.table);
                return None;
            }
        };
        match read(remote).await {
            Ok(found) => found,
            Err(err) => {
                warn!("Remote unavailable for {} ({}): {}", context, self.table, err);
                None
            }
        }
    }

    /// Runs a local read; errors are logged and degrade to `T::default()`.
    pub fn local_read<T, F>(&self, context: &str, read: F) -> T
    where
        T: Default,
        F: FnOnce(&mut SqliteConnection) -> Result<T>,
    {
        let pool = self.manager.pool();
        match get_connection(&pool).and_then(|mut conn| read(&mut conn)) {
            Ok(value) => value,
            Err(err) => {
                error!("Local read failed for {} ({}): {}", context, self.table, err);
                T::default()
            }
        }
    }

    /// Local mirror write. Joins the active batch if there is one.
    pub async fn mirror_local<F>(&self, entity_id: &str, job: F)
    where
        F: FnOnce(&mut SqliteConnection) -> Result<()> + Send + 'static,
    {
        if let Err(err) = self.manager.write_local(job).await {
            error!(
                "Local mirror write failed for {}/{}: {}",
                self.table, entity_id, err
            );
        }
    }

    /// Records a write the remote store did not confirm.
    pub async fn enqueue_pending(&self, payload: SyncPayload, entity_id: &str) {
        let operation = payload.operation();
        let encoded = match payload.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(
                    "Cannot encode pending sync {} {}/{}: {}",
                    operation, self.table, entity_id, err
                );
                return;
            }
        };

        let table = self.table;
        let entity = entity_id.to_string();
        let result = self
            .manager
            .write_local(move |conn| {
                insert_queue_entry(conn, table, &entity, operation, &encoded).map(|_| ())
            })
            .await;
        match result {
            Ok(()) => info!(
                "Queued pending sync: {} {}/{}",
                operation, self.table, entity_id
            ),
            Err(err) => error!(
                "Failed to queue pending sync {} {}/{}: {}",
                operation, self.table, entity_id, err
            ),
        }
    }

    /// Logs a failed remote write at the level its cause deserves.
    pub fn log_remote_write_failure(&self, action: &str, entity_id: &str, err: &Error) {
        if err.is_offline() {
            debug!(
                "Offline; {} {}/{} goes to the sync queue",
                action, self.table, entity_id
            );
        } else {
            error!(
                "Failed to {} {}/{} remotely: {}",
                action, self.table, entity_id, err
            );
        }
    }
}

pub(crate) fn enum_to_db<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

pub(crate) fn decimal_to_db(value: Option<Decimal>) -> Option<f64> {
    value.and_then(|d| d.to_f64())
}

pub(crate) fn decimal_from_db(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64)
}

/// RFC 3339, UTC, microseconds. Sorts lexicographically in time order.
pub(crate) fn timestamp_to_db(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_from_db(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn now_timestamp() -> String {
    timestamp_to_db(&Utc::now())
}

/// Serializes an entity into a JSON object row.
pub(crate) fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(row) => Ok(row),
        other => Err(Error::Sync(format!("Expected a JSON object, got {}", other))),
    }
}

pub(crate) fn from_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Error::from))
        .collect()
}

/// Lossy numeric view of a JSON value, for remote aggregates.
pub(crate) fn json_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
