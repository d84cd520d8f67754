//! Error types for negation-ledger

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Must be authenticated to add a point")]
    Unauthenticated,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient cred: {user_id} cannot commit {requested} cred")]
    InsufficientCred { user_id: String, requested: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether the caller may safely retry the whole operation.
    ///
    /// Only store availability failures qualify: the transaction never
    /// committed, so a retry cannot double-apply.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable(_))
    }
}

impl From<DieselError> for LedgerError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => LedgerError::NotFound("record not found".into()),
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                LedgerError::StoreUnavailable(info.message().to_string())
            }
            DieselError::DatabaseError(_, ref info) if is_busy_message(info.message()) => {
                LedgerError::StoreUnavailable(info.message().to_string())
            }
            DieselError::DatabaseError(kind, info) => {
                LedgerError::Internal(format!("Database error ({:?}): {}", kind, info.message()))
            }
            other => LedgerError::Internal(format!("Query failed: {}", other)),
        }
    }
}

impl From<diesel::r2d2::PoolError> for LedgerError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        LedgerError::StoreUnavailable(format!("Connection pool: {}", err))
    }
}

fn is_busy_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}
