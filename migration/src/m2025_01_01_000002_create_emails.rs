//! Migration to create the emails table.
//!
//! Emails reference their canonical user through `user_id`. The unique index on
//! (tenant_id, external_message_id, provider) makes re-ingesting a message a
//! no-op, and the (tenant_id, provider, received_at) index serves watermark
//! lookups.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Emails::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Emails::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Emails::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Emails::UserId).uuid().not_null())
                    .col(ColumnDef::new(Emails::ExternalMessageId).text().not_null())
                    .col(ColumnDef::new(Emails::FromAddress).text().not_null())
                    .col(ColumnDef::new(Emails::ToAddresses).json_binary().not_null())
                    .col(ColumnDef::new(Emails::CcAddresses).json_binary().not_null())
                    .col(ColumnDef::new(Emails::BccAddresses).json_binary().not_null())
                    .col(ColumnDef::new(Emails::Subject).text().not_null())
                    .col(ColumnDef::new(Emails::Body).text().not_null())
                    .col(
                        ColumnDef::new(Emails::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Emails::Provider).text().not_null())
                    .col(
                        ColumnDef::new(Emails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_emails_user_id")
                            .from(Emails::Table, Emails::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_tenant_message_provider")
                    .table(Emails::Table)
                    .col(Emails::TenantId)
                    .col(Emails::ExternalMessageId)
                    .col(Emails::Provider)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_tenant_provider_received")
                    .table(Emails::Table)
                    .col(Emails::TenantId)
                    .col(Emails::Provider)
                    .col(Emails::ReceivedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_user_id")
                    .table(Emails::Table)
                    .col(Emails::UserId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_emails_tenant_message_provider",
            "idx_emails_tenant_provider_received",
            "idx_emails_user_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Emails::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Emails {
    Table,
    Id,
    TenantId,
    UserId,
    ExternalMessageId,
    FromAddress,
    ToAddresses,
    CcAddresses,
    BccAddresses,
    Subject,
    Body,
    ReceivedAt,
    Provider,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
