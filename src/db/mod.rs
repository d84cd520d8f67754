//! SQLite database module for the cred ledger
//!
//! ## Architecture
//!
//! - Diesel repositories per table (`points`, `balances`, `endorsements`)
//! - r2d2 pool of `SqliteConnection`s, WAL journal for file databases
//! - Multi-step writes run inside one `BEGIN IMMEDIATE` unit of work
//!
//! ## Tables
//!
//! - `users` - Spendable cred balance per identity
//! - `points` - Immutable argumentative statements
//! - `endorsements` - Cred committed by an identity to a point

pub mod balances;
pub mod diesel_schema;
pub mod endorsements;
pub mod models;
pub mod points;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::LedgerError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Per-connection settings applied whenever the pool opens a connection
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub busy_timeout: Duration,
    pub pool_size: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            pool_size: 8,
        }
    }
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // busy_timeout first, later PRAGMAs may already contend for the file
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// SQLite database for points, balances and endorsements
pub struct LedgerDb {
    pool: DbPool,
}

impl LedgerDb {
    /// Open or create the ledger database file
    pub fn open(db_path: &Path, options: ConnectionOptions) -> Result<Self, LedgerError> {
        info!("Opening ledger database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(options.pool_size.max(1))
            .connection_customizer(Box::new(options))
            .build(manager)
            .map_err(|e| LedgerError::StoreUnavailable(format!("Failed to open SQLite: {}", e)))?;

        let db = Self { pool };

        db.with_conn(|conn| {
            // WAL is persistent in the file, so one connection sets it for all
            conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
                .map_err(|e| LedgerError::Internal(format!("Failed to set PRAGMA: {}", e)))
        })?;
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every `:memory:` connection is its own database, so the pool holds
    /// exactly one connection for the lifetime of the handle.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionOptions::default()))
            .build(manager)
            .map_err(|e| {
                LedgerError::StoreUnavailable(format!("Failed to open in-memory SQLite: {}", e))
            })?;

        let db = Self { pool };
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), LedgerError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read or single-statement write on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.pool.get()?;
        f(&mut *conn)
    }

    /// Run `f` as one atomic unit of work.
    ///
    /// The transaction is opened with `BEGIN IMMEDIATE`, taking the write lock
    /// up front so concurrent writers queue on `busy_timeout` instead of failing
    /// at commit. Any `Err` from `f` rolls back every statement it issued.
    pub fn unit_of_work<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, LedgerError>,
    {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction(f)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LedgerError> {
        self.with_conn(|conn| {
            Ok(DbStats {
                user_count: balances::user_count(conn)? as u64,
                point_count: points::point_count(conn)? as u64,
                endorsement_count: endorsements::endorsement_count(conn)? as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbStats {
    pub user_count: u64,
    pub point_count: u64,
    pub endorsement_count: u64,
}

// Re-exports
pub use models::{Endorsement, Point, PointId, PointView, UserBalance};
