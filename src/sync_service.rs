//! Sync Service
//!
//! Orchestrates one incremental ingestion run for a (tenant, provider) pair:
//! resolve the watermark, fetch and persist users, re-read canonical
//! identities, then fetch and persist each user's new mail with bounded
//! concurrency.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::config::{RetryPolicy, SyncConfig};
use crate::domain::{Provider, User};
use crate::error::SyncError;
use crate::providers::{ProviderClient, ProviderError, ProviderRegistry};
use crate::repositories::{BatchReport, Repository};

/// Outcome of a successful tenant sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub tenant_id: Uuid,
    pub provider: Provider,
    /// Watermark the run fetched mail after
    pub watermark: DateTime<Utc>,
    pub users_fetched: usize,
    pub users: BatchReport,
    /// Fetched users with no stored identity after the write phase, or whose
    /// external id the provider could not interpret
    pub users_unresolved: usize,
    /// Users whose mailbox fetch failed and was skipped
    pub users_failed: usize,
    pub emails_fetched: usize,
    pub emails: BatchReport,
}

impl SyncSummary {
    fn new(tenant_id: Uuid, provider: Provider, watermark: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            provider,
            watermark,
            users_fetched: 0,
            users: BatchReport::default(),
            users_unresolved: 0,
            users_failed: 0,
            emails_fetched: 0,
            emails: BatchReport::default(),
        }
    }
}

/// External user id to canonical internal id, for a single provider
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    by_external_id: HashMap<String, Uuid>,
}

impl IdentityMap {
    /// Build from stored users, keeping only rows of `provider`.
    pub fn from_stored(users: &[User], provider: Provider) -> Self {
        let mut by_external_id = HashMap::new();
        for user in users.iter().filter(|u| u.provider == provider) {
            by_external_id
                .entry(user.external_user_id.clone())
                .or_insert(user.id);
        }
        Self { by_external_id }
    }

    pub fn resolve(&self, external_user_id: &str) -> Option<Uuid> {
        self.by_external_id.get(external_user_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_external_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_external_id.is_empty()
    }
}

enum MailboxOutcome {
    Synced { fetched: usize, report: BatchReport },
    /// The provider rejected the stored external id itself
    Unresolved,
    FetchFailed,
}

/// Runs tenant syncs against the registered providers
pub struct SyncService {
    repository: Arc<dyn Repository>,
    registry: ProviderRegistry,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        repository: Arc<dyn Repository>,
        registry: ProviderRegistry,
        config: SyncConfig,
    ) -> Self {
        Self {
            repository,
            registry,
            config,
        }
    }

    /// Sync one tenant's users and new mail from `provider`.
    pub async fn sync_tenant(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<SyncSummary, SyncError> {
        self.sync_tenant_with_cancel(tenant_id, provider, &CancellationToken::new())
            .await
    }

    /// Same as [`sync_tenant`](Self::sync_tenant), stopping with
    /// [`SyncError::Cancelled`] once `cancel` fires. Rows already committed
    /// stay committed.
    #[instrument(skip(self, cancel), fields(tenant_id = %tenant_id, provider = %provider))]
    pub async fn sync_tenant_with_cancel(
        &self,
        tenant_id: Uuid,
        provider: Provider,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let started = Instant::now();
        let result = self.run(tenant_id, provider, cancel).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        counter!(
            "ingest_sync_runs_total",
            "provider" => provider.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("ingest_sync_duration_seconds", "provider" => provider.as_str())
            .record(elapsed.as_secs_f64());

        match &result {
            Ok(summary) => {
                record_summary_metrics(summary);
                info!(
                    watermark = %summary.watermark,
                    users_fetched = summary.users_fetched,
                    users_inserted = summary.users.inserted,
                    users_skipped = summary.users.skipped,
                    users_unresolved = summary.users_unresolved,
                    users_failed = summary.users_failed,
                    emails_fetched = summary.emails_fetched,
                    emails_inserted = summary.emails.inserted,
                    emails_skipped = summary.emails.skipped,
                    emails_failed = summary.emails.failed,
                    duration_ms = elapsed.as_millis() as u64,
                    "Sync completed"
                );
            }
            Err(SyncError::Cancelled) => warn!("Sync cancelled"),
            Err(err) => error!(error = %err, kind = err.kind(), "Sync failed"),
        }

        result
    }

    async fn run(
        &self,
        tenant_id: Uuid,
        provider: Provider,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let client = self
            .registry
            .get(provider)
            .map_err(|_| SyncError::UnsupportedProvider {
                provider: provider.to_string(),
            })?;

        let watermark = cancellable(
            cancel,
            self.repository.get_last_sync_time(tenant_id, provider),
        )
        .await??;
        debug!(%watermark, "Resolved watermark");

        let mut summary = SyncSummary::new(tenant_id, provider, watermark);

        let fetched = fetch_with_retry(&self.config.retry, cancel, "fetch_users", || {
            client.fetch_users(tenant_id)
        })
        .await?;
        summary.users_fetched = fetched.len();

        if fetched.is_empty() {
            info!("Provider returned no users");
            return Ok(summary);
        }

        summary.users = cancellable(cancel, self.repository.save_users(&fetched)).await??;

        // Placeholder ids from the fetch are never trusted; only stored rows are canonical.
        let stored = cancellable(cancel, self.repository.get_users_by_tenant(tenant_id)).await??;
        let identities = IdentityMap::from_stored(&stored, provider);
        debug!(identities = identities.len(), "Resolved canonical identities");

        let mut seen = HashSet::new();
        let mut mailboxes = Vec::new();
        for user in &fetched {
            if !seen.insert(user.external_user_id.as_str()) {
                continue;
            }
            match identities.resolve(&user.external_user_id) {
                Some(user_id) => mailboxes.push((user.external_user_id.clone(), user_id)),
                None => {
                    warn!(
                        external_user_id = %user.external_user_id,
                        "No stored identity for fetched user; skipping mailbox"
                    );
                    summary.users_unresolved += 1;
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.email_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for (external_user_id, user_id) in mailboxes {
            let span = info_span!("mailbox", external_user_id = %external_user_id, %user_id);
            let worker = MailboxWorker {
                client: client.clone(),
                repository: self.repository.clone(),
                retry: self.config.retry.clone(),
                cancel: cancel.clone(),
                tenant_id,
                provider,
                watermark,
            };
            let semaphore = semaphore.clone();

            workers.spawn(
                async move {
                    let _permit = cancellable(&worker.cancel, semaphore.acquire_owned())
                        .await?
                        .map_err(|e| SyncError::Worker(e.to_string()))?;
                    worker.sync(&external_user_id, user_id).await
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    workers.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    workers.abort_all();
                    return Err(SyncError::Worker(join_err.to_string()));
                }
            };

            match outcome {
                MailboxOutcome::Synced { fetched, report } => {
                    summary.emails_fetched += fetched;
                    summary.emails.merge(report);
                }
                MailboxOutcome::Unresolved => summary.users_unresolved += 1,
                MailboxOutcome::FetchFailed => summary.users_failed += 1,
            }
        }

        Ok(summary)
    }
}

/// Everything one per-user task needs, owned so it can be spawned
struct MailboxWorker {
    client: Arc<dyn ProviderClient>,
    repository: Arc<dyn Repository>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    tenant_id: Uuid,
    provider: Provider,
    watermark: DateTime<Utc>,
}

impl MailboxWorker {
    async fn sync(&self, external_user_id: &str, user_id: Uuid) -> Result<MailboxOutcome, SyncError> {
        let fetched = fetch_with_retry(&self.retry, &self.cancel, "fetch_emails", || {
            self.client
                .fetch_emails(self.tenant_id, external_user_id, self.watermark)
        })
        .await;

        let mut emails = match fetched {
            Ok(emails) => emails,
            Err(SyncError::Provider(err @ ProviderError::InvalidUserId { .. })) => {
                warn!(error = %err, "External user id not usable by provider; skipping mailbox");
                return Ok(MailboxOutcome::Unresolved);
            }
            Err(SyncError::Provider(err)) => {
                warn!(error = %err, "Mailbox fetch failed; continuing with remaining users");
                counter!(
                    "ingest_user_fetch_failures_total",
                    "provider" => self.provider.as_str()
                )
                .increment(1);
                return Ok(MailboxOutcome::FetchFailed);
            }
            Err(err) => return Err(err),
        };

        let fetched = emails.len();
        if emails.is_empty() {
            debug!("No new mail");
            return Ok(MailboxOutcome::Synced {
                fetched,
                report: BatchReport::default(),
            });
        }

        for email in &mut emails {
            email.user_id = user_id;
        }

        let report = cancellable(&self.cancel, self.repository.save_emails(&emails)).await??;
        debug!(
            fetched,
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed,
            "Persisted mailbox batch"
        );

        Ok(MailboxOutcome::Synced { fetched, report })
    }
}

fn record_summary_metrics(summary: &SyncSummary) {
    let provider = summary.provider.as_str();
    counter!("ingest_emails_inserted_total", "provider" => provider)
        .increment(summary.emails.inserted as u64);
    counter!("ingest_emails_skipped_total", "provider" => provider)
        .increment(summary.emails.skipped as u64);
    counter!("ingest_rows_failed_total", "provider" => provider, "table" => "users")
        .increment(summary.users.failed as u64);
    counter!("ingest_rows_failed_total", "provider" => provider, "table" => "emails")
        .increment(summary.emails.failed as u64);
}

/// Await `future` unless `cancel` fires first.
async fn cancellable<F>(cancel: &CancellationToken, future: F) -> Result<F::Output, SyncError>
where
    F: Future,
{
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        output = future => Ok(output),
    }
}

/// Call a provider, retrying retryable failures with backoff.
async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut call: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match cancellable(cancel, call()).await? {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = backoff_delay(policy, attempt, err.retry_after_secs());
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Provider call failed; retrying"
                );
                cancellable(cancel, sleep(delay)).await?;
                attempt += 1;
            }
            Err(err) => return Err(SyncError::Provider(err)),
        }
    }
}

/// Backoff before retry number `attempt + 1`.
///
/// `base * 2^attempt` capped at `max`, raised to the provider's retry-after
/// hint, plus up to `jitter_factor` of itself.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let exponent = attempt.min(30) as i32;
    let mut backoff = (policy.base_ms as f64 * 2_f64.powi(exponent)).min(policy.max_ms as f64);

    if let Some(retry_after) = retry_after_secs {
        backoff = backoff.max(retry_after as f64 * 1000.0);
    }

    let jitter_span = policy.jitter_factor * backoff;
    let jitter = if jitter_span > 0.0 {
        thread_rng().gen_range(0.0..jitter_span)
    } else {
        0.0
    };

    Duration::from_millis((backoff + jitter).round() as u64)
}
