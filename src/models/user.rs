//! User entity model
//!
//! SeaORM entity for the users table, which stores directory users fetched
//! from providers, unique per (tenant, external user id, provider).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Stored directory user
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Canonical internal identifier, assigned by whichever sync stored the row first
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Provider-native user identifier
    pub external_user_id: String,

    /// Primary email address
    pub email: String,

    /// Display name
    pub name: String,

    /// Provider slug (google, microsoft)
    pub provider: String,

    /// Timestamp when the row was first stored
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::email::Entity")]
    Emails,
}

impl Related<super::email::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Emails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
