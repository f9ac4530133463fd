//! Persistent tunnel metadata and the provisioning ledger.
//!
//! [`TunnelStore`] owns [`TunnelRecord`] rows; [`LedgerStore`] owns the
//! append-only progress log and audit events. [`SeaOrmStore`] implements
//! both against any `sea-orm` backend.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

mod entities;
mod migrations;
mod sea;

pub use sea::SeaOrmStore;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Lifecycle state of a [`TunnelRecord`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TunnelStatus {
    /// External resources are being created.
    Provisioning,
    /// The tunnel is serving traffic.
    Active,
    /// Provisioning failed; compensation was attempted.
    Failed,
}

impl TunnelStatus {
    /// Stable string form persisted in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }

    /// Whether the status still reserves its (server, container, port) triple.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Provisioning | Self::Active)
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for TunnelStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Decode(format!("unknown tunnel status {other:?}"))),
        }
    }
}

/// Persistent description of one exposed container port.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelRecord {
    /// Record identifier (UUID).
    pub id: String,
    /// Owner that requested the tunnel.
    pub owner_id: String,
    /// Server hosting the container.
    pub server_id: String,
    /// Container being exposed.
    pub container_id: String,
    /// Reference to the domain credential used.
    pub domain_credential_id: String,
    /// Label under the domain, for example `abc123`.
    pub subdomain: String,
    /// Public hostname, `subdomain.domain`.
    pub full_domain: String,
    /// Port inside the container.
    pub container_port: u16,
    /// Port published on the host.
    pub host_port: u16,
    /// External tunnel identifier, once created.
    pub tunnel_id: Option<String>,
    /// Tunnel secret, once created.
    pub tunnel_secret: Option<String>,
    /// External DNS record identifier, once created.
    pub dns_record_id: Option<String>,
    /// Lifecycle state.
    pub status: TunnelStatus,
    /// Failure description for `failed` records.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for TunnelRecord {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TunnelRecord")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("server_id", &self.server_id)
            .field("container_id", &self.container_id)
            .field("domain_credential_id", &self.domain_credential_id)
            .field("full_domain", &self.full_domain)
            .field("container_port", &self.container_port)
            .field("host_port", &self.host_port)
            .field("tunnel_id", &self.tunnel_id)
            .field("tunnel_secret", &self.tunnel_secret.as_ref().map(|_| "***"))
            .field("dns_record_id", &self.dns_record_id)
            .field("status", &self.status)
            .field("error_message", &self.error_message)
            .finish_non_exhaustive()
    }
}

/// One chunk of the append-only provisioning log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonic sequence number assigned by the store.
    pub sequence: i64,
    /// Resource the chunk belongs to.
    pub resource_id: String,
    /// Text chunk, usually newline-terminated.
    pub chunk: String,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

/// Saga outcome recorded in the audit trail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuditKind {
    /// A tunnel reached `active`.
    TunnelCreated,
    /// Tunnel creation failed.
    TunnelCreateFailed,
    /// A tunnel was torn down.
    TunnelDeleted,
    /// Tunnel teardown failed.
    TunnelDeleteFailed,
}

impl AuditKind {
    /// Stable string form persisted in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TunnelCreated => "tunnel_created",
            Self::TunnelCreateFailed => "tunnel_create_failed",
            Self::TunnelDeleted => "tunnel_deleted",
            Self::TunnelDeleteFailed => "tunnel_delete_failed",
        }
    }
}

impl FromStr for AuditKind {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tunnel_created" => Ok(Self::TunnelCreated),
            "tunnel_create_failed" => Ok(Self::TunnelCreateFailed),
            "tunnel_deleted" => Ok(Self::TunnelDeleted),
            "tunnel_delete_failed" => Ok(Self::TunnelDeleteFailed),
            other => Err(StoreError::Decode(format!("unknown audit kind {other:?}"))),
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Audit event to append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAuditEvent {
    /// Acting owner.
    pub owner_id: String,
    /// Server the event concerns.
    pub server_id: String,
    /// Tunnel record the event concerns, when one exists.
    pub tunnel_record_id: Option<String>,
    /// Outcome kind.
    pub kind: AuditKind,
    /// Human-readable description.
    pub description: String,
}

/// Stored audit event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    /// Sequence number assigned by the store.
    pub sequence: i64,
    /// Event payload.
    pub event: NewAuditEvent,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

/// Errors raised by store implementations.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// A live record already exists for the same (server, container, port).
    #[error("a live tunnel already exists: {0}")]
    Conflict(String),
    /// A row could not be decoded into a domain value.
    #[error("stored data is invalid: {0}")]
    Decode(String),
    /// The backend failed.
    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Access to [`TunnelRecord`] rows.
///
/// At most one record with a live status may exist per
/// (server, container, container port); [`TunnelStore::insert`] and
/// [`TunnelStore::update`] report [`StoreError::Conflict`] otherwise.
pub trait TunnelStore: Send + Sync {
    /// Finds the live record for a (server, container, port) triple.
    fn find_live<'a>(
        &'a self,
        server_id: &'a str,
        container_id: &'a str,
        container_port: u16,
    ) -> StoreFuture<'a, Option<TunnelRecord>>;

    /// Inserts a new record.
    fn insert<'a>(&'a self, record: &'a TunnelRecord) -> StoreFuture<'a, ()>;

    /// Replaces an existing record, matched by id.
    fn update<'a>(&'a self, record: &'a TunnelRecord) -> StoreFuture<'a, ()>;

    /// Loads a record by id.
    fn find<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<TunnelRecord>>;

    /// Removes a record by id. Removing a missing record is not an error.
    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;

    /// Lists records hosted on a server, oldest first.
    fn list_for_server<'a>(&'a self, server_id: &'a str) -> StoreFuture<'a, Vec<TunnelRecord>>;
}

/// Append-only progress log and audit trail.
pub trait LedgerStore: Send + Sync {
    /// Appends a text chunk to the log of `resource_id`.
    fn append_log<'a>(&'a self, resource_id: &'a str, chunk: &'a str) -> StoreFuture<'a, ()>;

    /// Reads the log of `resource_id` in append order.
    fn read_log<'a>(&'a self, resource_id: &'a str) -> StoreFuture<'a, Vec<LogEntry>>;

    /// Appends an audit event.
    fn record_audit<'a>(&'a self, event: &'a NewAuditEvent) -> StoreFuture<'a, ()>;

    /// Lists audit events for a server in append order.
    fn audit_events<'a>(&'a self, server_id: &'a str) -> StoreFuture<'a, Vec<AuditEvent>>;
}
