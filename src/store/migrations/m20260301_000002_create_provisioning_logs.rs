//! Migration: create `provisioning_logs`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub(crate) struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProvisioningLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProvisioningLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProvisioningLogs::ResourceId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProvisioningLogs::Chunk).text().not_null())
                    .col(
                        ColumnDef::new(ProvisioningLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_provisioning_logs_resource")
                    .table(ProvisioningLogs::Table)
                    .col(ProvisioningLogs::ResourceId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ProvisioningLogs::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
#[iden = "provisioning_logs"]
enum ProvisioningLogs {
    Table,
    Id,
    #[iden = "resource_id"]
    ResourceId,
    Chunk,
    #[iden = "created_at"]
    CreatedAt,
}
