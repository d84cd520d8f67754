//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct SchemaVersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, LedgerError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| LedgerError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<SchemaVersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), LedgerError> {
    diesel::sql_query("DELETE FROM schema_version")
        .execute(conn)
        .map_err(|e| LedgerError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)
        .map_err(|e| LedgerError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    conn.batch_execute(LEDGER_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &mut SqliteConnection, from_version: i32) -> Result<(), LedgerError> {
    info!(from_version, "No migration steps registered");
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Balances, points and endorsements.
///
/// CHECK constraints hold for every writer, external crediting processes included.
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    cred INTEGER NOT NULL DEFAULT 0 CHECK (cred >= 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL CHECK (length(trim(content)) > 0),
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS endorsements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    point_id INTEGER NOT NULL REFERENCES points(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    cred INTEGER NOT NULL CHECK (cred > 0),
    created_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_points_created_by ON points(created_by);
CREATE INDEX IF NOT EXISTS idx_endorsements_point ON endorsements(point_id);
CREATE INDEX IF NOT EXISTS idx_endorsements_user ON endorsements(user_id);
"#;
