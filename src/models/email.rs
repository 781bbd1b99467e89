//! Email entity model
//!
//! SeaORM entity for the emails table. Rows are written once and never
//! updated; `received_at` doubles as the incremental sync watermark.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Stored email message
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "emails")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Canonical id of the owning user
    pub user_id: Uuid,

    /// Provider-native message identifier
    pub external_message_id: String,

    pub from_address: String,

    /// JSON array of recipient addresses
    #[sea_orm(column_type = "JsonBinary")]
    pub to_addresses: JsonValue,

    #[sea_orm(column_type = "JsonBinary")]
    pub cc_addresses: JsonValue,

    #[sea_orm(column_type = "JsonBinary")]
    pub bcc_addresses: JsonValue,

    pub subject: String,

    #[sea_orm(column_type = "Text")]
    pub body: String,

    /// When the provider received the message
    pub received_at: DateTimeWithTimeZone,

    /// Provider slug (google, microsoft)
    pub provider: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
