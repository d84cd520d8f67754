//! Endorsement records and per-point aggregates

use std::collections::HashSet;

use diesel::prelude::*;

use super::diesel_schema::endorsements;
use super::models::{current_timestamp, last_insert_rowid, Endorsement, NewEndorsement, PointId};
use crate::error::LedgerError;

/// Aggregated endorsement figures for one point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointCredTotals {
    pub total_cred: i64,
    pub supporters: i64,
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_endorsement(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Endorsement>, LedgerError> {
    endorsements::table
        .filter(endorsements::id.eq(id))
        .select(Endorsement::as_select())
        .first(conn)
        .optional()
        .map_err(LedgerError::from)
}

/// Endorsements on a point, oldest first
pub fn endorsements_for_point(
    conn: &mut SqliteConnection,
    point_id: PointId,
) -> Result<Vec<Endorsement>, LedgerError> {
    endorsements::table
        .filter(endorsements::point_id.eq(point_id))
        .order(endorsements::id.asc())
        .select(Endorsement::as_select())
        .load(conn)
        .map_err(LedgerError::from)
}

/// Total cred and distinct supporters of a point
pub fn point_totals(
    conn: &mut SqliteConnection,
    point_id: PointId,
) -> Result<PointCredTotals, LedgerError> {
    let rows: Vec<(String, i64)> = endorsements::table
        .filter(endorsements::point_id.eq(point_id))
        .select((endorsements::user_id, endorsements::cred))
        .load(conn)?;

    let total_cred = checked_total(rows.iter().map(|(_, cred)| *cred))?;
    let supporters = rows
        .iter()
        .map(|(user_id, _)| user_id.as_str())
        .collect::<HashSet<_>>()
        .len() as i64;

    Ok(PointCredTotals {
        total_cred,
        supporters,
    })
}

/// Cred one identity has committed to a point across all its endorsements
pub fn cred_by_user_on_point(
    conn: &mut SqliteConnection,
    point_id: PointId,
    user_id: &str,
) -> Result<i64, LedgerError> {
    let creds: Vec<i64> = endorsements::table
        .filter(endorsements::point_id.eq(point_id))
        .filter(endorsements::user_id.eq(user_id))
        .select(endorsements::cred)
        .load(conn)?;

    checked_total(creds)
}

fn checked_total(creds: impl IntoIterator<Item = i64>) -> Result<i64, LedgerError> {
    creds
        .into_iter()
        .try_fold(0i64, |total, cred| total.checked_add(cred))
        .ok_or_else(|| LedgerError::Internal("endorsement cred total overflows i64".into()))
}

pub fn endorsement_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    endorsements::table
        .count()
        .get_result(conn)
        .map_err(LedgerError::from)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Record an endorsement row.
///
/// Does not touch the balance; the coordinator pairs this with
/// [`super::balances::debit_cred`] inside the same unit of work.
pub fn record_endorsement(
    conn: &mut SqliteConnection,
    point_id: PointId,
    user_id: &str,
    cred: i64,
) -> Result<Endorsement, LedgerError> {
    if cred <= 0 {
        return Err(LedgerError::Validation(format!(
            "endorsement cred must be positive, got {}",
            cred
        )));
    }

    let created_at = current_timestamp();
    let new_endorsement = NewEndorsement {
        point_id,
        user_id,
        cred,
        created_at: &created_at,
    };

    diesel::insert_into(endorsements::table)
        .values(&new_endorsement)
        .execute(conn)?;

    let id = last_insert_rowid(conn)?;

    get_endorsement(conn, id)?
        .ok_or_else(|| LedgerError::Internal("Failed to retrieve created endorsement".into()))
}
