//! Point store
//!
//! Points are append-only: there is no update or delete path. Writes run on
//! the caller's connection and never open or commit a transaction of their
//! own, so they compose into the coordinator's unit of work.

use diesel::prelude::*;

use super::diesel_schema::points;
use super::models::{current_timestamp, last_insert_rowid, NewPoint, Point, PointId};
use crate::error::LedgerError;

/// Reject content that is empty once surrounding whitespace is removed
pub fn validate_content(content: &str) -> Result<(), LedgerError> {
    if content.trim().is_empty() {
        return Err(LedgerError::Validation("content must not be empty".into()));
    }
    Ok(())
}

// ============================================================================
// Read Operations
// ============================================================================

/// Get point by ID
pub fn get_point(
    conn: &mut SqliteConnection,
    point_id: PointId,
) -> Result<Option<Point>, LedgerError> {
    points::table
        .filter(points::id.eq(point_id))
        .select(Point::as_select())
        .first(conn)
        .optional()
        .map_err(LedgerError::from)
}

/// Newest points authored by `creator`
pub fn list_points_by_creator(
    conn: &mut SqliteConnection,
    creator: &str,
    limit: i64,
) -> Result<Vec<Point>, LedgerError> {
    points::table
        .filter(points::created_by.eq(creator))
        .order(points::id.desc())
        .limit(limit)
        .select(Point::as_select())
        .load(conn)
        .map_err(LedgerError::from)
}

pub fn point_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    points::table
        .count()
        .get_result(conn)
        .map_err(LedgerError::from)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append a point and return its store-assigned id
pub fn create_point(
    conn: &mut SqliteConnection,
    content: &str,
    creator: &str,
) -> Result<PointId, LedgerError> {
    validate_content(content)?;

    let created_at = current_timestamp();
    let new_point = NewPoint {
        content,
        created_by: creator,
        created_at: &created_at,
    };

    diesel::insert_into(points::table)
        .values(&new_point)
        .execute(conn)?;

    last_insert_rowid(conn).map_err(LedgerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    #[test]
    fn test_create_and_get_point() {
        let db = LedgerDb::open_in_memory().unwrap();

        let id = db
            .with_conn(|conn| create_point(conn, "Climate policy should prioritize nuclear", "alice"))
            .unwrap();

        let point = db.with_conn(|conn| get_point(conn, id)).unwrap().unwrap();
        assert_eq!(point.id, id);
        assert_eq!(point.content, "Climate policy should prioritize nuclear");
        assert_eq!(point.created_by, "alice");
        assert!(point.created_at.ends_with('Z'));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let db = LedgerDb::open_in_memory().unwrap();

        let first = db.with_conn(|conn| create_point(conn, "first", "alice")).unwrap();
        let second = db.with_conn(|conn| create_point(conn, "second", "bob")).unwrap();

        assert!(second > first);
    }

    #[test]
    fn test_empty_content_rejected() {
        let db = LedgerDb::open_in_memory().unwrap();

        for content in ["", "   ", "\n\t"] {
            let result = db.with_conn(|conn| create_point(conn, content, "alice"));
            assert!(matches!(result, Err(LedgerError::Validation(_))));
        }

        assert_eq!(db.with_conn(point_count).unwrap(), 0);
    }

    #[test]
    fn test_missing_point_is_none() {
        let db = LedgerDb::open_in_memory().unwrap();
        assert!(db.with_conn(|conn| get_point(conn, 42)).unwrap().is_none());
    }

    #[test]
    fn test_list_points_by_creator_newest_first() {
        let db = LedgerDb::open_in_memory().unwrap();

        db.with_conn(|conn| {
            create_point(conn, "one", "alice")?;
            create_point(conn, "two", "bob")?;
            create_point(conn, "three", "alice")
        })
        .unwrap();

        let points = db
            .with_conn(|conn| list_points_by_creator(conn, "alice", 10))
            .unwrap();
        let contents: Vec<&str> = points.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "one"]);
    }
}
