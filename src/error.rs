//! # Error Handling
//!
//! Error taxonomy for the ingestion engine. Fatal errors surface to the
//! caller of a sync as [`SyncError`]; row-level failures are recovered inside
//! the repositories and only show up in their batch reports.

use sea_orm::{DbErr, RuntimeErr, SqlErr};
use thiserror::Error;
use uuid::Uuid;

use crate::providers::ProviderError;

/// Terminal outcome of a failed tenant sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No client is registered for the requested provider.
    #[error("provider '{provider}' is not supported")]
    UnsupportedProvider { provider: String },

    /// Upstream fetch failure that could not be isolated to a single user.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Storage is unreachable or rejected a statement outside the tolerated
    /// per-row cases.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The caller's cancellation signal fired before the sync completed.
    #[error("sync cancelled")]
    Cancelled,

    /// A per-user worker panicked or was aborted unexpectedly.
    #[error("sync worker failed: {0}")]
    Worker(String),
}

impl SyncError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::UnsupportedProvider { .. } => "unsupported_provider",
            SyncError::Provider(_) => "provider",
            SyncError::Storage(_) => "storage",
            SyncError::Cancelled => "cancelled",
            SyncError::Worker(_) => "worker",
        }
    }
}

/// Errors raised by repository operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    /// A stored row could not be mapped back into the domain model.
    #[error("malformed {table} row {id}: {reason}")]
    MalformedRow {
        table: &'static str,
        id: Uuid,
        reason: String,
    },
}

impl StorageError {
    pub fn malformed_row(table: &'static str, id: Uuid, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            table,
            id,
            reason: reason.into(),
        }
    }
}

/// Whether a database error is a duplicate-key violation on any supported backend.
pub fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    if matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code_str = code.as_ref();
        code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str)
    })
}

/// Whether a database error means the store itself is unreachable, as opposed
/// to a single statement being rejected.
pub fn is_connection_error(error: &DbErr) -> bool {
    use sea_orm::sqlx::Error as SqlxError;

    match error {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => true,
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => matches!(
            sqlx_err,
            SqlxError::Io(_)
                | SqlxError::Tls(_)
                | SqlxError::PoolTimedOut
                | SqlxError::PoolClosed
                | SqlxError::WorkerCrashed
        ),
        _ => false,
    }
}
