//! Email repository
//!
//! Transactional, conflict-tolerant inserts into the `emails` table plus the
//! watermark query. Each row runs inside its own savepoint so one rejected row
//! leaves the surrounding transaction usable.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Email, Provider, epoch};
use crate::error::StorageError;
use crate::models::email::{self, Entity as EmailEntity};
use crate::repositories::{RowOutcome, classify};

/// Repository for the emails table
pub struct EmailRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> EmailRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Newest `received_at` for the tenant and provider, or the epoch.
    pub async fn latest_received_at(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<DateTime<Utc>, StorageError> {
        let latest = EmailEntity::find()
            .select_only()
            .column(email::Column::ReceivedAt)
            .filter(email::Column::TenantId.eq(tenant_id))
            .filter(email::Column::Provider.eq(provider.as_str()))
            .order_by_desc(email::Column::ReceivedAt)
            .limit(1)
            .into_tuple::<DateTimeWithTimeZone>()
            .one(self.db)
            .await?;

        Ok(latest.map(|ts| ts.with_timezone(&Utc)).unwrap_or_else(epoch))
    }

    /// Stored emails for the tenant and provider, newest first.
    pub async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
        provider: Provider,
    ) -> Result<Vec<Email>, StorageError> {
        let rows = EmailEntity::find()
            .filter(email::Column::TenantId.eq(tenant_id))
            .filter(email::Column::Provider.eq(provider.as_str()))
            .order_by_desc(email::Column::ReceivedAt)
            .order_by_asc(email::Column::Id)
            .all(self.db)
            .await?;

        rows.into_iter().map(from_model).collect()
    }

    /// Insert all emails in a single transaction.
    ///
    /// Returns one outcome per input row, in order. Failing to open or commit
    /// the transaction (or a savepoint) aborts the whole batch and rolls back.
    pub async fn insert_many_ignoring_conflicts(
        &self,
        emails: &[Email],
    ) -> Result<Vec<RowOutcome>, StorageError> {
        let txn = self.db.begin().await?;
        let mut outcomes = Vec::with_capacity(emails.len());

        for email in emails {
            let outcome = match validate(email) {
                Err(reason) => RowOutcome::Failed(reason),
                Ok(()) => insert_in_savepoint(&txn, email).await?,
            };
            if let RowOutcome::Failed(reason) = &outcome {
                warn!(
                    tenant_id = %email.tenant_id,
                    provider = %email.provider,
                    external_message_id = %email.external_message_id,
                    reason = %reason,
                    "Skipping email row"
                );
            }
            outcomes.push(outcome);
        }

        txn.commit().await?;
        debug!(rows = emails.len(), "Committed email batch");
        Ok(outcomes)
    }
}

async fn insert_in_savepoint(
    txn: &DatabaseTransaction,
    email: &Email,
) -> Result<RowOutcome, StorageError> {
    let savepoint = txn.begin().await?;

    let result = EmailEntity::insert(to_active_model(email))
        .on_conflict(
            OnConflict::columns([
                email::Column::TenantId,
                email::Column::ExternalMessageId,
                email::Column::Provider,
            ])
            .do_nothing()
            .to_owned(),
        )
        .do_nothing()
        .exec_without_returning(&savepoint)
        .await;

    if result.is_ok() {
        savepoint.commit().await?;
    } else {
        savepoint.rollback().await?;
    }

    classify(result)
}

fn validate(email: &Email) -> Result<(), String> {
    if email.external_message_id.trim().is_empty() {
        return Err("empty external message id".to_string());
    }
    if email.user_id.is_nil() {
        return Err("email is not attributed to a user".to_string());
    }
    Ok(())
}

fn addresses(list: &[String]) -> JsonValue {
    JsonValue::Array(list.iter().cloned().map(JsonValue::String).collect())
}

fn to_active_model(email: &Email) -> email::ActiveModel {
    email::ActiveModel {
        id: Set(email.id),
        tenant_id: Set(email.tenant_id),
        user_id: Set(email.user_id),
        external_message_id: Set(email.external_message_id.clone()),
        from_address: Set(email.from.clone()),
        to_addresses: Set(addresses(&email.to)),
        cc_addresses: Set(addresses(&email.cc)),
        bcc_addresses: Set(addresses(&email.bcc)),
        subject: Set(email.subject.clone()),
        body: Set(email.body.clone()),
        received_at: Set(email.received_at.fixed_offset()),
        provider: Set(email.provider.as_str().to_string()),
        created_at: Set(Utc::now().fixed_offset()),
    }
}

fn from_model(model: email::Model) -> Result<Email, StorageError> {
    let id = model.id;
    let provider: Provider = model
        .provider
        .parse()
        .map_err(|e: crate::domain::UnknownProvider| {
            StorageError::malformed_row("emails", id, e.to_string())
        })?;
    let decode = |value: JsonValue, column: &str| -> Result<Vec<String>, StorageError> {
        serde_json::from_value(value).map_err(|e| {
            StorageError::malformed_row("emails", id, format!("{column}: {e}"))
        })
    };

    Ok(Email {
        id,
        tenant_id: model.tenant_id,
        user_id: model.user_id,
        external_message_id: model.external_message_id,
        from: model.from_address,
        to: decode(model.to_addresses, "to_addresses")?,
        cc: decode(model.cc_addresses, "cc_addresses")?,
        bcc: decode(model.bcc_addresses, "bcc_addresses")?,
        subject: model.subject,
        body: model.body,
        received_at: model.received_at.with_timezone(&Utc),
        provider,
    })
}
