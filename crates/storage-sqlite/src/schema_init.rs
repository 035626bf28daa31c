//! Startup schema setup, guarded by the single-row `schema_version` record.

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};

use gatekeeper_core::Result;

use crate::errors::StorageError;
use crate::schema::schema_version;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Version the embedded migrations bring the local store to.
pub const SCHEMA_VERSION: i32 = 1;

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);";

#[derive(Queryable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::schema_version)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct SchemaVersionDB {
    id: i32,
    version: i32,
    applied_at: String,
}

/// Creates or upgrades the local tables. Safe to call on every start; must
/// run before any repository is constructed.
///
/// Returns the schema version now recorded.
pub fn initialize_schema(db_path: &str) -> Result<i32> {
    let mut conn = SqliteConnection::establish(db_path).map_err(StorageError::from)?;
    conn.batch_execute(CREATE_VERSION_TABLE)
        .map_err(StorageError::from)?;

    let recorded = schema_version::table
        .find(1)
        .select(schema_version::version)
        .first::<i32>(&mut conn)
        .optional()
        .map_err(StorageError::from)?;

    if let Some(version) = recorded.filter(|v| *v >= SCHEMA_VERSION) {
        debug!("Local schema already at version {}", version);
        return Ok(version);
    }

    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    info!(
        "Applied {} local migration(s); schema version {} -> {}",
        applied.len(),
        recorded.unwrap_or(0),
        SCHEMA_VERSION
    );

    let row = SchemaVersionDB {
        id: 1,
        version: SCHEMA_VERSION,
        applied_at: Utc::now().to_rfc3339(),
    };
    diesel::insert_into(schema_version::table)
        .values(&row)
        .on_conflict(schema_version::id)
        .do_update()
        .set(&row)
        .execute(&mut conn)
        .map_err(StorageError::from)?;

    Ok(SCHEMA_VERSION)
}
