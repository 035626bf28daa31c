//! Local database: file location, pooled connections and the writer thread.

mod connection_manager;
pub mod write_actor;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::path::Path;
use std::sync::Arc;

use gatekeeper_core::Result;

use crate::errors::StorageError;

pub use connection_manager::ConnectionManager;
pub use write_actor::{spawn_writer, WriteHandle};

pub type DbPool = Pool<r2d2::ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<r2d2::ConnectionManager<SqliteConnection>>;

pub const DB_FILE_NAME: &str = "gatekeeper.db";

const POOL_MAX_SIZE: u32 = 8;
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Ensures the data directory exists and returns the database file path.
pub fn init(app_data_dir: &str) -> Result<String> {
    let dir = Path::new(app_data_dir);
    std::fs::create_dir_all(dir).map_err(StorageError::from)?;
    let db_path = dir.join(DB_FILE_NAME);
    debug!("Local database path: {}", db_path.display());
    Ok(db_path.to_string_lossy().to_string())
}

/// Per-connection pragmas: WAL so readers never block the writer.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode = WAL; \
             PRAGMA busy_timeout = {}; \
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = r2d2::ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .max_size(POOL_MAX_SIZE)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout_ms: BUSY_TIMEOUT_MS,
        }))
        .build(manager)
        .map_err(StorageError::from)?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    Ok(pool.get().map_err(StorageError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::prelude::*;
    use tempfile::tempdir;

    #[derive(QueryableByName)]
    struct JournalMode {
        #[diesel(sql_type = diesel::sql_types::Text)]
        journal_mode: String,
    }

    #[test]
    fn pooled_connections_use_wal() {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let db_path = init(&app_data).expect("init db");
        assert!(db_path.ends_with(DB_FILE_NAME));

        let pool = create_pool(&db_path).expect("create pool");
        let mut conn = get_connection(&pool).expect("conn");
        let mode = diesel::sql_query("PRAGMA journal_mode")
            .get_result::<JournalMode>(&mut conn)
            .expect("journal mode");
        assert_eq!(mode.journal_mode.to_lowercase(), "wal");
    }
}
