//! Cred balances
//!
//! Every decrement goes through [`debit_cred`], a single conditional UPDATE.
//! The `cred >= amount` predicate is evaluated by SQLite under the write lock,
//! so two debits against the same row can never both observe the old balance.

use diesel::prelude::*;
use tracing::debug;

use super::diesel_schema::users;
use super::models::{current_timestamp, NewUserBalance, UserBalance};
use crate::error::LedgerError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_balance_row(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<UserBalance>, LedgerError> {
    users::table
        .filter(users::id.eq(user_id))
        .select(UserBalance::as_select())
        .first(conn)
        .optional()
        .map_err(LedgerError::from)
}

/// Spendable cred; identities without a row hold nothing
pub fn get_balance(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, LedgerError> {
    Ok(get_balance_row(conn, user_id)?.map(|row| row.cred).unwrap_or(0))
}

pub fn user_count(conn: &mut SqliteConnection) -> Result<i64, LedgerError> {
    users::table
        .count()
        .get_result(conn)
        .map_err(LedgerError::from)
}

// ============================================================================
// Write Operations
// ============================================================================

/// Atomically subtract `amount` if the balance covers it.
///
/// Returns `false` when no row was affected: the identity has no balance row
/// or holds less than `amount`. Callers abort their transaction in that case.
pub fn debit_cred(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: i64,
) -> Result<bool, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::Validation(format!(
            "debit amount must be positive, got {}",
            amount
        )));
    }

    let affected = diesel::update(
        users::table
            .filter(users::id.eq(user_id))
            .filter(users::cred.ge(amount)),
    )
    .set(users::cred.eq(users::cred - amount))
    .execute(conn)?;

    debug!(user_id, amount, affected, "Conditional cred debit");
    Ok(affected == 1)
}

/// Credit `amount` to `user_id`, creating the balance row on first grant.
///
/// The increment is guarded like the debit: a grant that would push the
/// balance past `i64::MAX` affects no row and fails with `Validation`.
/// Returns the balance after the grant.
pub fn grant_cred(
    conn: &mut SqliteConnection,
    user_id: &str,
    amount: i64,
) -> Result<i64, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::Validation(format!(
            "grant amount must be positive, got {}",
            amount
        )));
    }

    let affected = diesel::update(
        users::table
            .filter(users::id.eq(user_id))
            .filter(users::cred.le(i64::MAX - amount)),
    )
    .set(users::cred.eq(users::cred + amount))
    .execute(conn)?;

    if affected == 0 {
        if get_balance_row(conn, user_id)?.is_some() {
            return Err(LedgerError::Validation(format!(
                "grant of {} would overflow the balance of {}",
                amount, user_id
            )));
        }

        let created_at = current_timestamp();
        diesel::insert_into(users::table)
            .values(&NewUserBalance {
                id: user_id,
                cred: amount,
                created_at: &created_at,
            })
            .execute(conn)?;
    }

    debug!(user_id, amount, "Cred granted");
    get_balance(conn, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    #[test]
    fn test_grant_creates_then_accumulates() {
        let db = LedgerDb::open_in_memory().unwrap();

        assert_eq!(db.with_conn(|conn| grant_cred(conn, "alice", 30)).unwrap(), 30);
        assert_eq!(db.with_conn(|conn| grant_cred(conn, "alice", 20)).unwrap(), 50);
        assert_eq!(db.with_conn(user_count).unwrap(), 1);
    }

    #[test]
    fn test_overflowing_grant_rejected() {
        let db = LedgerDb::open_in_memory().unwrap();

        assert_eq!(
            db.with_conn(|conn| grant_cred(conn, "alice", i64::MAX)).unwrap(),
            i64::MAX
        );
        assert!(matches!(
            db.with_conn(|conn| grant_cred(conn, "alice", 1)),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(
            db.with_conn(|conn| get_balance(conn, "alice")).unwrap(),
            i64::MAX
        );

        // Room left below the ceiling is still grantable
        db.with_conn(|conn| debit_cred(conn, "alice", 10)).unwrap();
        assert_eq!(
            db.with_conn(|conn| grant_cred(conn, "alice", 10)).unwrap(),
            i64::MAX
        );
    }

    #[test]
    fn test_unknown_user_has_zero_balance() {
        let db = LedgerDb::open_in_memory().unwrap();
        assert_eq!(db.with_conn(|conn| get_balance(conn, "nobody")).unwrap(), 0);
    }

    #[test]
    fn test_debit_within_balance() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| grant_cred(conn, "alice", 10)).unwrap();

        assert!(db.with_conn(|conn| debit_cred(conn, "alice", 6)).unwrap());
        assert_eq!(db.with_conn(|conn| get_balance(conn, "alice")).unwrap(), 4);
    }

    #[test]
    fn test_debit_exact_balance_reaches_zero() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| grant_cred(conn, "alice", 50)).unwrap();

        assert!(db.with_conn(|conn| debit_cred(conn, "alice", 50)).unwrap());
        assert_eq!(db.with_conn(|conn| get_balance(conn, "alice")).unwrap(), 0);
        assert!(!db.with_conn(|conn| debit_cred(conn, "alice", 1)).unwrap());
    }

    #[test]
    fn test_overdraft_affects_nothing() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| grant_cred(conn, "alice", 5)).unwrap();

        assert!(!db.with_conn(|conn| debit_cred(conn, "alice", 6)).unwrap());
        assert_eq!(db.with_conn(|conn| get_balance(conn, "alice")).unwrap(), 5);
    }

    #[test]
    fn test_debit_without_row_affects_nothing() {
        let db = LedgerDb::open_in_memory().unwrap();
        assert!(!db.with_conn(|conn| debit_cred(conn, "ghost", 1)).unwrap());
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let db = LedgerDb::open_in_memory().unwrap();

        assert!(matches!(
            db.with_conn(|conn| debit_cred(conn, "alice", 0)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            db.with_conn(|conn| grant_cred(conn, "alice", -3)),
            Err(LedgerError::Validation(_))
        ));
    }
}
