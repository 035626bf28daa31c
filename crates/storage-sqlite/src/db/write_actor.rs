//! Single writer thread: every local mutation is funneled through one
//! connection, one job at a time, each inside an immediate transaction.

use diesel::connection::Connection;
use diesel::sqlite::SqliteConnection;
use log::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use tokio::sync::oneshot;

use gatekeeper_core::errors::{DatabaseError, Error, Result};

use super::DbPool;
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send>;

const WRITER_THREAD_NAME: &str = "gatekeeper-writer";

/// Error carried through `immediate_transaction`, which needs `From<diesel::Error>`.
enum TxError {
    Diesel(diesel::result::Error),
    App(Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        Self::Diesel(err)
    }
}

fn run_in_transaction<F, T>(conn: &mut SqliteConnection, job: F) -> Result<T>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T>,
{
    match conn.immediate_transaction::<T, TxError, _>(|conn| job(conn).map_err(TxError::App)) {
        Ok(value) => Ok(value),
        Err(TxError::App(err)) => Err(err),
        Err(TxError::Diesel(err)) => Err(StorageError::from(err).into()),
    }
}

fn writer_unavailable() -> Error {
    Error::Database(DatabaseError::Internal(
        "Local writer is not running".to_string(),
    ))
}

/// Cloneable handle to the writer thread. Acts as the process-wide write lock.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<Job>,
}

impl WriteHandle {
    /// Runs `job` on the writer connection in its own transaction.
    ///
    /// An `Err` from the job rolls the transaction back.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let boxed: Job = Box::new(move |conn: &mut SqliteConnection| {
            let _ = reply_tx.send(run_in_transaction(conn, job));
        });

        self.tx.send(boxed).map_err(|_| writer_unavailable())?;
        reply_rx.await.map_err(|_| writer_unavailable())?
    }

    /// Queues `job` without waiting for it; its failure is only logged.
    ///
    /// Jobs still run in submission order relative to `exec`.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce(&mut SqliteConnection) -> Result<()> + Send + 'static,
    {
        let boxed: Job = Box::new(move |conn: &mut SqliteConnection| {
            if let Err(err) = run_in_transaction(conn, job) {
                error!("Detached local write failed: {}", err);
            }
        });
        if self.tx.send(boxed).is_err() {
            error!("Local writer is not running; detached write dropped");
        }
    }
}

/// Starts the writer thread on a dedicated pooled connection.
///
/// If the thread or its connection cannot be set up the failure is logged and
/// every later `exec` reports the writer as unavailable.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, rx) = mpsc::channel::<Job>();

    let spawned = thread::Builder::new()
        .name(WRITER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut conn = match pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    error!("Writer could not acquire a connection: {}", err);
                    return;
                }
            };
            for job in rx {
                if catch_unwind(AssertUnwindSafe(|| job(&mut *conn))).is_err() {
                    error!("Writer job panicked; transaction rolled back");
                }
            }
            debug!("Writer thread exiting");
        });

    if let Err(err) = spawned {
        error!("Failed to spawn writer thread: {}", err);
    }

    WriteHandle { tx }
}
