use sea_orm_migration::prelude::*;

mod m20260301_000001_create_tunnel_records;
mod m20260301_000002_create_provisioning_logs;
mod m20260301_000003_create_audit_events;

pub(crate) struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_tunnel_records::Migration),
            Box::new(m20260301_000002_create_provisioning_logs::Migration),
            Box::new(m20260301_000003_create_audit_events::Migration),
        ]
    }
}
