//! Diesel model definitions for ledger tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)

use diesel::prelude::*;
use diesel::sql_types::BigInt;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

/// Store-assigned point identifier
pub type PointId = i64;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

#[derive(QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

/// Rowid assigned by the most recent INSERT on this connection
pub(crate) fn last_insert_rowid(conn: &mut SqliteConnection) -> QueryResult<i64> {
    diesel::sql_query("SELECT last_insert_rowid() AS id")
        .get_result::<LastInsertRowId>(conn)
        .map(|row| row.id)
}

// ============================================================================
// Balance Models
// ============================================================================

/// Balance row from the users table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserBalance {
    pub id: String,
    pub cred: i64,
    pub created_at: String,
}

/// New balance row for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUserBalance<'a> {
    pub id: &'a str,
    pub cred: i64,
    pub created_at: &'a str,
}

// ============================================================================
// Point Models
// ============================================================================

/// Point row from SELECT query
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = points)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Point {
    pub id: PointId,
    pub content: String,
    pub created_by: String,
    pub created_at: String,
}

/// New point for INSERT (id is assigned by the store)
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = points)]
pub struct NewPoint<'a> {
    pub content: &'a str,
    pub created_by: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Endorsement Models
// ============================================================================

/// Endorsement row from SELECT query
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = endorsements)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Endorsement {
    pub id: i64,
    pub point_id: PointId,
    pub user_id: String,
    pub cred: i64,
    pub created_at: String,
}

/// New endorsement for INSERT
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = endorsements)]
pub struct NewEndorsement<'a> {
    pub point_id: PointId,
    pub user_id: &'a str,
    pub cred: i64,
    pub created_at: &'a str,
}

// ============================================================================
// Views
// ============================================================================

/// Point with endorsement aggregates (API response)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointView {
    #[serde(flatten)]
    pub point: Point,
    /// Sum of all endorsement cred on the point
    pub total_cred: i64,
    /// Distinct endorsing identities
    pub supporters: i64,
    /// Cred the viewing identity has committed; `None` for anonymous viewers
    pub viewer_cred: Option<i64>,
}
