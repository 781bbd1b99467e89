//! # Repository Layer
//!
//! Persistence boundary for the sync service. [`Repository`] is the trait the
//! orchestrator depends on; [`SqlRepository`] implements it on SeaORM by
//! delegating to the per-table [`UserRepository`] and [`EmailRepository`].
//!
//! Writes are idempotent: a row whose natural key already exists is skipped,
//! and a row the database rejects for any other reason is logged and counted
//! without aborting the rest of the batch.

pub mod email;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{DatabaseConnection, DbErr, TryInsertResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Email, Provider, User};
use crate::error::{StorageError, is_connection_error, is_unique_violation};

pub use email::EmailRepository;
pub use user::UserRepository;

/// Result of writing a single row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted,
    /// The natural key already existed
    Skipped,
    /// The row was rejected; the batch carried on
    Failed(String),
}

/// Per-batch write counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Inserted => self.inserted += 1,
            RowOutcome::Skipped => self.skipped += 1,
            RowOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Number of rows the batch contained.
    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.failed
    }
}

impl<'a> FromIterator<&'a RowOutcome> for BatchReport {
    fn from_iter<I: IntoIterator<Item = &'a RowOutcome>>(iter: I) -> Self {
        let mut report = BatchReport::default();
        for outcome in iter {
            report.record(outcome);
        }
        report
    }
}

/// Map an insert result onto a row outcome, surfacing only connectivity loss.
pub(crate) fn classify(
    result: Result<TryInsertResult<u64>, DbErr>,
) -> Result<RowOutcome, StorageError> {
    match result {
        Ok(TryInsertResult::Inserted(0))
        | Ok(TryInsertResult::Conflicted)
        | Ok(TryInsertResult::Empty) => Ok(RowOutcome::Skipped),
        Ok(TryInsertResult::Inserted(_)) => Ok(RowOutcome::Inserted),
        Err(err) if is_unique_violation(&err) => Ok(RowOutcome::Skipped),
        Err(err) if is_connection_error(&err) => Err(err.into()),
        Err(err) => Ok(RowOutcome::Failed(err.to_string())),
    }
}

/// Storage operations required by the sync service
#[async_trait]
pub trait Repository: Send + Sync {
    /// Create tables and indexes if missing. Safe to call repeatedly.
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Latest `received_at` among the tenant's emails for `provider`, or the
    /// Unix epoch when there are none.
    async fn get_last_sync_time(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<DateTime<Utc>, StorageError>;

    /// Insert users, skipping rows whose (tenant, external id, provider) exists.
    async fn save_users(&self, users: &[User]) -> Result<BatchReport, StorageError>;

    /// Insert emails in one transaction, skipping rows whose
    /// (tenant, external message id, provider) exists.
    async fn save_emails(&self, emails: &[Email]) -> Result<BatchReport, StorageError>;

    /// Canonical users stored for the tenant, across all providers.
    async fn get_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError>;
}

/// SeaORM-backed [`Repository`]
#[derive(Debug, Clone)]
pub struct SqlRepository {
    db: Arc<DatabaseConnection>,
    /// Serializes batch writes so concurrent sync workers never interleave
    /// transactions on backends with a single writer.
    write_lock: Arc<Mutex<()>>,
}

impl SqlRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Stored emails for a tenant and provider, newest first.
    pub async fn get_emails_by_tenant(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<Vec<Email>, StorageError> {
        self.emails().find_by_tenant(tenant_id, provider).await
    }

    fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.db)
    }

    fn emails(&self) -> EmailRepository<'_> {
        EmailRepository::new(&self.db)
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn init_schema(&self) -> Result<(), StorageError> {
        Migrator::up(self.db.as_ref(), None).await?;
        debug!("Schema is up to date");
        Ok(())
    }

    async fn get_last_sync_time(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<DateTime<Utc>, StorageError> {
        self.emails().latest_received_at(tenant_id, provider).await
    }

    async fn save_users(&self, users: &[User]) -> Result<BatchReport, StorageError> {
        let _guard = self.write_lock.lock().await;
        let outcomes = self.users().insert_many_ignoring_conflicts(users).await?;
        Ok(outcomes.iter().collect())
    }

    async fn save_emails(&self, emails: &[Email]) -> Result<BatchReport, StorageError> {
        if emails.is_empty() {
            return Ok(BatchReport::default());
        }
        let _guard = self.write_lock.lock().await;
        let outcomes = self.emails().insert_many_ignoring_conflicts(emails).await?;
        Ok(outcomes.iter().collect())
    }

    async fn get_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError> {
        self.users().find_by_tenant(tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_each_outcome() {
        let outcomes = vec![
            RowOutcome::Inserted,
            RowOutcome::Skipped,
            RowOutcome::Inserted,
            RowOutcome::Failed("fk".to_string()),
        ];
        let report: BatchReport = outcomes.iter().collect();
        assert_eq!(
            report,
            BatchReport {
                inserted: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(report.total(), 4);
    }

    #[test]
    fn insert_results_classify() {
        assert_eq!(
            classify(Ok(TryInsertResult::Inserted(1))).unwrap(),
            RowOutcome::Inserted
        );
        assert_eq!(
            classify(Ok(TryInsertResult::Inserted(0))).unwrap(),
            RowOutcome::Skipped
        );
        assert_eq!(
            classify(Ok(TryInsertResult::Conflicted)).unwrap(),
            RowOutcome::Skipped
        );
        assert!(matches!(
            classify(Err(DbErr::Custom("check failed".to_string()))).unwrap(),
            RowOutcome::Failed(_)
        ));
        assert!(
            classify(Err(DbErr::Conn(sea_orm::RuntimeErr::Internal(
                "gone".to_string()
            ))))
            .is_err()
        );
    }

    #[test]
    fn reports_merge() {
        let mut total = BatchReport {
            inserted: 1,
            skipped: 0,
            failed: 0,
        };
        total.merge(BatchReport {
            inserted: 2,
            skipped: 3,
            failed: 1,
        });
        assert_eq!(total.inserted, 3);
        assert_eq!(total.skipped, 3);
        assert_eq!(total.failed, 1);
    }
}
