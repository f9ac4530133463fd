//! Migration: create `tunnel_records` with the live-triple uniqueness index.

use sea_orm_migration::prelude::*;

/// Partial unique index: one live record per (server, container, port).
const LIVE_TRIPLE_INDEX: &str = concat!(
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tunnel_records_live_triple ",
    "ON tunnel_records (server_id, container_id, container_port) ",
    "WHERE status IN ('provisioning', 'active')"
);

#[derive(DeriveMigrationName)]
pub(crate) struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TunnelRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TunnelRecords::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TunnelRecords::OwnerId).string().not_null())
                    .col(ColumnDef::new(TunnelRecords::ServerId).string().not_null())
                    .col(ColumnDef::new(TunnelRecords::ContainerId).string().not_null())
                    .col(
                        ColumnDef::new(TunnelRecords::DomainCredentialId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TunnelRecords::Subdomain).string().not_null())
                    .col(ColumnDef::new(TunnelRecords::FullDomain).string().not_null())
                    .col(
                        ColumnDef::new(TunnelRecords::ContainerPort)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TunnelRecords::HostPort).integer().not_null())
                    .col(ColumnDef::new(TunnelRecords::TunnelId).string().null())
                    .col(ColumnDef::new(TunnelRecords::TunnelSecret).text().null())
                    .col(ColumnDef::new(TunnelRecords::DnsRecordId).string().null())
                    .col(
                        ColumnDef::new(TunnelRecords::Status)
                            .string()
                            .not_null()
                            .default("provisioning"),
                    )
                    .col(ColumnDef::new(TunnelRecords::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(TunnelRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TunnelRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tunnel_records_server")
                    .table(TunnelRecords::Table)
                    .col(TunnelRecords::ServerId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(LIVE_TRIPLE_INDEX)
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TunnelRecords::Table).if_exists().to_owned())
            .await
    }
}

#[derive(Iden)]
#[iden = "tunnel_records"]
enum TunnelRecords {
    Table,
    Id,
    #[iden = "owner_id"]
    OwnerId,
    #[iden = "server_id"]
    ServerId,
    #[iden = "container_id"]
    ContainerId,
    #[iden = "domain_credential_id"]
    DomainCredentialId,
    Subdomain,
    #[iden = "full_domain"]
    FullDomain,
    #[iden = "container_port"]
    ContainerPort,
    #[iden = "host_port"]
    HostPort,
    #[iden = "tunnel_id"]
    TunnelId,
    #[iden = "tunnel_secret"]
    TunnelSecret,
    #[iden = "dns_record_id"]
    DnsRecordId,
    Status,
    #[iden = "error_message"]
    ErrorMessage,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}
