//! User repository
//!
//! Conflict-tolerant inserts into the `users` table and the canonical read-back
//! used for identity resolution.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Provider, User};
use crate::error::StorageError;
use crate::models::user::{self, Entity as UserEntity};
use crate::repositories::{RowOutcome, classify};

/// Repository for the users table
pub struct UserRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert each user as an independent statement.
    ///
    /// Returns one outcome per input row, in order. Only connectivity failures
    /// abort the batch.
    pub async fn insert_many_ignoring_conflicts(
        &self,
        users: &[User],
    ) -> Result<Vec<RowOutcome>, StorageError> {
        let mut outcomes = Vec::with_capacity(users.len());
        for user in users {
            let outcome = match validate(user) {
                Err(reason) => RowOutcome::Failed(reason),
                Ok(()) => self.insert_one(user).await?,
            };
            if let RowOutcome::Failed(reason) = &outcome {
                warn!(
                    tenant_id = %user.tenant_id,
                    provider = %user.provider,
                    external_user_id = %user.external_user_id,
                    reason = %reason,
                    "Skipping user row"
                );
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn insert_one(&self, user: &User) -> Result<RowOutcome, StorageError> {
        let result = UserEntity::insert(to_active_model(user))
            .on_conflict(
                OnConflict::columns([
                    user::Column::TenantId,
                    user::Column::ExternalUserId,
                    user::Column::Provider,
                ])
                .do_nothing()
                .to_owned(),
            )
            .do_nothing()
            .exec_without_returning(self.db)
            .await;

        classify(result)
    }

    /// Stored users for a tenant, oldest first.
    pub async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, StorageError> {
        let rows = UserEntity::find()
            .filter(user::Column::TenantId.eq(tenant_id))
            .order_by_asc(user::Column::CreatedAt)
            .order_by_asc(user::Column::Id)
            .all(self.db)
            .await?;

        rows.into_iter().map(from_model).collect()
    }
}

fn validate(user: &User) -> Result<(), String> {
    if user.external_user_id.trim().is_empty() {
        return Err("empty external user id".to_string());
    }
    Ok(())
}

fn to_active_model(user: &User) -> user::ActiveModel {
    user::ActiveModel {
        id: Set(user.id),
        tenant_id: Set(user.tenant_id),
        external_user_id: Set(user.external_user_id.clone()),
        email: Set(user.email.clone()),
        name: Set(user.name.clone()),
        provider: Set(user.provider.as_str().to_string()),
        created_at: Set(Utc::now().fixed_offset()),
    }
}

fn from_model(model: user::Model) -> Result<User, StorageError> {
    let provider: Provider = model
        .provider
        .parse()
        .map_err(|e: crate::domain::UnknownProvider| {
            StorageError::malformed_row("users", model.id, e.to_string())
        })?;

    Ok(User {
        id: model.id,
        tenant_id: model.tenant_id,
        external_user_id: model.external_user_id,
        email: model.email,
        name: model.name,
        provider,
    })
}
