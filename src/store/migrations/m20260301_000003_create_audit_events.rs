//! Migration: create `audit_events`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub(crate) struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditEvents::OwnerId).string().not_null())
                    .col(ColumnDef::new(AuditEvents::ServerId).string().not_null())
                    .col(ColumnDef::new(AuditEvents::TunnelRecordId).string().null())
                    .col(ColumnDef::new(AuditEvents::Kind).string().not_null())
                    .col(ColumnDef::new(AuditEvents::Description).text().not_null())
                    .col(
                        ColumnDef::new(AuditEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditEvents::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
#[iden = "audit_events"]
enum AuditEvents {
    Table,
    Id,
    #[iden = "owner_id"]
    OwnerId,
    #[iden = "server_id"]
    ServerId,
    #[iden = "tunnel_record_id"]
    TunnelRecordId,
    Kind,
    Description,
    #[iden = "created_at"]
    CreatedAt,
}
