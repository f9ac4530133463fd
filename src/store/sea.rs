//! `sea-orm` implementation of the store traits.

use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    DbErr, EntityTrait, NotSet, QueryFilter, QueryOrder, SqlErr,
};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use super::entities::{audit_event, provisioning_log, tunnel_record};
use super::migrations::Migrator;
use super::{
    AuditEvent, LedgerStore, LogEntry, NewAuditEvent, StoreError, StoreFuture, TunnelRecord,
    TunnelStatus, TunnelStore,
};

/// Store backed by a `sea-orm` connection (SQLite or Postgres).
#[derive(Clone, Debug)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    /// Connects to `database_url` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the connection or a migration
    /// fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // Every pooled connection to `:memory:` opens a separate database.
        let pool_size = if database_url.contains(":memory:") { 1 } else { 8 };
        let mut options = ConnectOptions::new(database_url.to_owned());
        options
            .max_connections(pool_size)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        let db = Database::connect(options).await.map_err(backend)?;
        Self::with_connection(db).await
    }

    /// Wraps an existing connection and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when a migration fails.
    pub async fn with_connection(db: DatabaseConnection) -> Result<Self, StoreError> {
        Migrator::up(&db, None).await.map_err(backend)?;
        info!("tunnel store migrations applied");
        Ok(Self { db })
    }
}

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn write_error(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => StoreError::Conflict(message),
        _ => backend(err),
    }
}

fn port_to_column(port: u16) -> i32 {
    i32::from(port)
}

fn port_from_column(value: i32, column: &str) -> Result<u16, StoreError> {
    u16::try_from(value)
        .map_err(|_| StoreError::Decode(format!("{column} {value} is not a valid port")))
}

fn to_active_model(record: &TunnelRecord) -> tunnel_record::ActiveModel {
    tunnel_record::ActiveModel {
        id: Set(record.id.clone()),
        owner_id: Set(record.owner_id.clone()),
        server_id: Set(record.server_id.clone()),
        container_id: Set(record.container_id.clone()),
        domain_credential_id: Set(record.domain_credential_id.clone()),
        subdomain: Set(record.subdomain.clone()),
        full_domain: Set(record.full_domain.clone()),
        container_port: Set(port_to_column(record.container_port)),
        host_port: Set(port_to_column(record.host_port)),
        tunnel_id: Set(record.tunnel_id.clone()),
        tunnel_secret: Set(record.tunnel_secret.clone()),
        dns_record_id: Set(record.dns_record_id.clone()),
        status: Set(record.status.as_str().to_owned()),
        error_message: Set(record.error_message.clone()),
        created_at: Set(record.created_at),
        updated_at: Set(record.updated_at),
    }
}

fn from_model(model: tunnel_record::Model) -> Result<TunnelRecord, StoreError> {
    Ok(TunnelRecord {
        container_port: port_from_column(model.container_port, "container_port")?,
        host_port: port_from_column(model.host_port, "host_port")?,
        status: model.status.parse()?,
        id: model.id,
        owner_id: model.owner_id,
        server_id: model.server_id,
        container_id: model.container_id,
        domain_credential_id: model.domain_credential_id,
        subdomain: model.subdomain,
        full_domain: model.full_domain,
        tunnel_id: model.tunnel_id,
        tunnel_secret: model.tunnel_secret,
        dns_record_id: model.dns_record_id,
        error_message: model.error_message,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn from_audit_model(model: audit_event::Model) -> Result<AuditEvent, StoreError> {
    Ok(AuditEvent {
        sequence: model.id,
        event: NewAuditEvent {
            kind: model.kind.parse()?,
            owner_id: model.owner_id,
            server_id: model.server_id,
            tunnel_record_id: model.tunnel_record_id,
            description: model.description,
        },
        created_at: model.created_at,
    })
}

impl TunnelStore for SeaOrmStore {
    fn find_live<'a>(
        &'a self,
        server_id: &'a str,
        container_id: &'a str,
        container_port: u16,
    ) -> StoreFuture<'a, Option<TunnelRecord>> {
        Box::pin(async move {
            let live = [
                TunnelStatus::Provisioning.as_str(),
                TunnelStatus::Active.as_str(),
            ];
            tunnel_record::Entity::find()
                .filter(tunnel_record::Column::ServerId.eq(server_id))
                .filter(tunnel_record::Column::ContainerId.eq(container_id))
                .filter(tunnel_record::Column::ContainerPort.eq(port_to_column(container_port)))
                .filter(tunnel_record::Column::Status.is_in(live))
                .one(&self.db)
                .await
                .map_err(backend)?
                .map(from_model)
                .transpose()
        })
    }

    fn insert<'a>(&'a self, record: &'a TunnelRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tunnel_record::Entity::insert(to_active_model(record))
                .exec_without_returning(&self.db)
                .await
                .map_err(write_error)?;
            Ok(())
        })
    }

    fn update<'a>(&'a self, record: &'a TunnelRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut model = to_active_model(record);
            model.updated_at = Set(Utc::now());
            model.update(&self.db).await.map_err(write_error)?;
            Ok(())
        })
    }

    fn find<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<TunnelRecord>> {
        Box::pin(async move {
            tunnel_record::Entity::find_by_id(id.to_owned())
                .one(&self.db)
                .await
                .map_err(backend)?
                .map(from_model)
                .transpose()
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tunnel_record::Entity::delete_by_id(id.to_owned())
                .exec(&self.db)
                .await
                .map_err(backend)?;
            Ok(())
        })
    }

    fn list_for_server<'a>(&'a self, server_id: &'a str) -> StoreFuture<'a, Vec<TunnelRecord>> {
        Box::pin(async move {
            tunnel_record::Entity::find()
                .filter(tunnel_record::Column::ServerId.eq(server_id))
                .order_by_asc(tunnel_record::Column::CreatedAt)
                .all(&self.db)
                .await
                .map_err(backend)?
                .into_iter()
                .map(from_model)
                .collect()
        })
    }
}

impl LedgerStore for SeaOrmStore {
    fn append_log<'a>(&'a self, resource_id: &'a str, chunk: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let entry = provisioning_log::ActiveModel {
                id: NotSet,
                resource_id: Set(resource_id.to_owned()),
                chunk: Set(chunk.to_owned()),
                created_at: Set(Utc::now()),
            };
            provisioning_log::Entity::insert(entry)
                .exec_without_returning(&self.db)
                .await
                .map_err(backend)?;
            Ok(())
        })
    }

    fn read_log<'a>(&'a self, resource_id: &'a str) -> StoreFuture<'a, Vec<LogEntry>> {
        Box::pin(async move {
            let rows = provisioning_log::Entity::find()
                .filter(provisioning_log::Column::ResourceId.eq(resource_id))
                .order_by_asc(provisioning_log::Column::Id)
                .all(&self.db)
                .await
                .map_err(backend)?;
            Ok(rows
                .into_iter()
                .map(|row| LogEntry {
                    sequence: row.id,
                    resource_id: row.resource_id,
                    chunk: row.chunk,
                    created_at: row.created_at,
                })
                .collect())
        })
    }

    fn record_audit<'a>(&'a self, event: &'a NewAuditEvent) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let row = audit_event::ActiveModel {
                id: NotSet,
                owner_id: Set(event.owner_id.clone()),
                server_id: Set(event.server_id.clone()),
                tunnel_record_id: Set(event.tunnel_record_id.clone()),
                kind: Set(event.kind.as_str().to_owned()),
                description: Set(event.description.clone()),
                created_at: Set(Utc::now()),
            };
            audit_event::Entity::insert(row)
                .exec_without_returning(&self.db)
                .await
                .map_err(backend)?;
            Ok(())
        })
    }

    fn audit_events<'a>(&'a self, server_id: &'a str) -> StoreFuture<'a, Vec<AuditEvent>> {
        Box::pin(async move {
            audit_event::Entity::find()
                .filter(audit_event::Column::ServerId.eq(server_id))
                .order_by_asc(audit_event::Column::Id)
                .all(&self.db)
                .await
                .map_err(backend)?
                .into_iter()
                .map(from_audit_model)
                .collect()
        })
    }
}
