use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tunnel_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner_id: String,
    pub server_id: String,
    pub container_id: String,
    pub domain_credential_id: String,
    pub subdomain: String,
    pub full_domain: String,
    pub container_port: i32,
    pub host_port: i32,
    pub tunnel_id: Option<String>,
    pub tunnel_secret: Option<String>,
    pub dns_record_id: Option<String>,
    /// provisioning | active | failed
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
