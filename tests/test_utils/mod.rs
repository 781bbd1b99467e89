//! Test utilities for database and provider testing.
//!
//! In-memory SQLite repositories plus hand-written fakes for the repository
//! and provider seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ingest::domain::{Email, Provider, User};
use ingest::error::StorageError;
use ingest::providers::{ProviderClient, ProviderError};
use ingest::repositories::{BatchReport, Repository, SqlRepository};
use sea_orm::{Database, DbErr};
use uuid::Uuid;

/// Sets up an in-memory SQLite repository with the schema applied.
pub async fn setup_test_repository() -> Result<Arc<SqlRepository>> {
    let db = Database::connect("sqlite::memory:").await?;
    let repository = SqlRepository::new(Arc::new(db));
    repository.init_schema().await?;
    Ok(Arc::new(repository))
}

/// Whole-second timestamp `hours` after a fixed reference instant.
pub fn at_hour(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
}

pub fn make_user(tenant_id: Uuid, external_user_id: &str, provider: Provider) -> User {
    User {
        id: Uuid::new_v4(),
        tenant_id,
        external_user_id: external_user_id.to_string(),
        email: format!("{external_user_id}@example.com"),
        name: format!("User {external_user_id}"),
        provider,
    }
}

pub fn make_email(
    tenant_id: Uuid,
    user_id: Uuid,
    external_message_id: &str,
    received_at: DateTime<Utc>,
    provider: Provider,
) -> Email {
    Email {
        id: Uuid::new_v4(),
        tenant_id,
        user_id,
        external_message_id: external_message_id.to_string(),
        from: "sender@external.example".to_string(),
        to: vec!["rcpt@example.com".to_string()],
        cc: Vec::new(),
        bcc: Vec::new(),
        subject: format!("Subject {external_message_id}"),
        body: "body".to_string(),
        received_at,
        provider,
    }
}

/// Scriptable in-memory provider.
///
/// Mail is keyed by external user id; users listed in `failing_mailboxes`
/// fail their mail fetch with a non-retryable error, and users listed in
/// `hanging_mailboxes` never answer.
pub struct FakeProvider {
    provider: Provider,
    users: Vec<(String, String)>,
    mail: HashMap<String, Vec<(String, DateTime<Utc>)>>,
    failing_mailboxes: HashSet<String>,
    hanging_mailboxes: HashSet<String>,
    user_fetch_error: Option<ProviderError>,
    pub user_fetches: AtomicUsize,
    pub mail_fetches: AtomicUsize,
}

impl FakeProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            users: Vec::new(),
            mail: HashMap::new(),
            failing_mailboxes: HashSet::new(),
            hanging_mailboxes: HashSet::new(),
            user_fetch_error: None,
            user_fetches: AtomicUsize::new(0),
            mail_fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_user(mut self, external_user_id: &str, email: &str) -> Self {
        self.users
            .push((external_user_id.to_string(), email.to_string()));
        self
    }

    pub fn with_mail(
        mut self,
        external_user_id: &str,
        external_message_id: &str,
        received_at: DateTime<Utc>,
    ) -> Self {
        self.mail
            .entry(external_user_id.to_string())
            .or_default()
            .push((external_message_id.to_string(), received_at));
        self
    }

    pub fn with_failing_mailbox(mut self, external_user_id: &str) -> Self {
        self.failing_mailboxes.insert(external_user_id.to_string());
        self
    }

    pub fn with_hanging_mailbox(mut self, external_user_id: &str) -> Self {
        self.hanging_mailboxes.insert(external_user_id.to_string());
        self
    }

    pub fn with_user_fetch_error(mut self, error: ProviderError) -> Self {
        self.user_fetch_error = Some(error);
        self
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch_users(&self, tenant_id: Uuid) -> Result<Vec<User>, ProviderError> {
        self.user_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.user_fetch_error {
            return Err(err.clone());
        }
        Ok(self
            .users
            .iter()
            .map(|(external_user_id, email)| User {
                id: Uuid::new_v4(),
                tenant_id,
                external_user_id: external_user_id.clone(),
                email: email.clone(),
                name: email.clone(),
                provider: self.provider,
            })
            .collect())
    }

    async fn fetch_emails(
        &self,
        tenant_id: Uuid,
        external_user_id: &str,
        received_after: DateTime<Utc>,
    ) -> Result<Vec<Email>, ProviderError> {
        self.mail_fetches.fetch_add(1, Ordering::SeqCst);
        if self.hanging_mailboxes.contains(external_user_id) {
            std::future::pending::<()>().await;
        }
        if self.failing_mailboxes.contains(external_user_id) {
            return Err(ProviderError::Unavailable {
                details: format!("mailbox {external_user_id} not found"),
            });
        }
        Ok(self
            .mail
            .get(external_user_id)
            .into_iter()
            .flatten()
            .filter(|(_, received_at)| *received_at > received_after)
            .map(|(message_id, received_at)| {
                make_email(tenant_id, Uuid::nil(), message_id, *received_at, self.provider)
            })
            .collect())
    }
}

/// Repository that records every call and stores nothing.
#[derive(Default)]
pub struct CountingRepository {
    pub calls: AtomicUsize,
    pub saved_emails: Mutex<Vec<Email>>,
}

impl CountingRepository {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for CountingRepository {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_last_sync_time(
        &self,
        _tenant_id: Uuid,
        _provider: Provider,
    ) -> Result<DateTime<Utc>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DateTime::<Utc>::UNIX_EPOCH)
    }

    async fn save_users(&self, users: &[User]) -> Result<BatchReport, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(BatchReport {
            inserted: users.len(),
            ..BatchReport::default()
        })
    }

    async fn save_emails(&self, emails: &[Email]) -> Result<BatchReport, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saved_emails
            .lock()
            .unwrap()
            .extend(emails.iter().cloned());
        Ok(BatchReport {
            inserted: emails.len(),
            ..BatchReport::default()
        })
    }

    async fn get_users_by_tenant(&self, _tenant_id: Uuid) -> Result<Vec<User>, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Wraps a real repository and fails every email write.
pub struct FailingEmailRepository {
    pub inner: Arc<SqlRepository>,
}

#[async_trait]
impl Repository for FailingEmailRepository {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.inner.init_schema().await
    }

    async fn get_last_sync_time(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<DateTime<Utc>, StorageError> {
        self.inner.get_last_sync_time(tenant_id, provider).await
    }

    async fn save_users(&self, users: &[User]) -> Result<BatchReport, StorageError> {
        self.inner.save_users(users).await
    }

    async fn save_emails(&self, _emails: &[Email]) -> Result<BatchReport, StorageError> {
        Err(StorageError::Database(DbErr::Custom(
            "disk I/O error".to_string(),
        )))
    }

    async fn get_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError> {
        self.inner.get_users_by_tenant(tenant_id).await
    }
}
