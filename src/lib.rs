//! Core library for the Vorota tunnel provisioning tool.
//!
//! Vorota exposes a port of a container running on a remote host through a
//! managed tunnel. Provisioning coordinates three systems that fail
//! independently: the tunnel/DNS control plane ([`control_plane`]), the
//! remote host reached over SSH ([`remote`]), and the metadata store that
//! doubles as the provisioning ledger ([`store`], [`ledger`]). The sagas in
//! [`tunnel`] keep them consistent: every external resource is recorded the
//! moment it exists and compensated when a later step fails.

pub mod config;
pub mod control_plane;
pub mod credentials;
pub mod ledger;
pub mod logging;
pub mod remote;
pub mod store;
pub mod test_support;
pub mod tunnel;

pub use config::{ConfigError, VorotaConfig};
pub use control_plane::{
    ClientSettings, ControlPlane, ControlPlaneClient, ControlPlaneError, CreatedDnsRecord,
    CreatedTunnel, DnsRecordRequest,
};
pub use credentials::{
    CredentialBundle, CredentialsError, DomainCredential, ServerCredential, ServerSecret,
};
pub use ledger::{LedgerScope, ProvisioningLedger};
pub use logging::{LogFormat, LoggingError};
pub use remote::{RemoteError, RemoteExecutor, RemoteOutput, SshExecutor, SshSettings};
pub use store::{
    AuditEvent, AuditKind, LedgerStore, LogEntry, NewAuditEvent, SeaOrmStore, StoreError,
    TunnelRecord, TunnelStatus, TunnelStore,
};
pub use tunnel::{
    RemoteLayout, TeardownRequest, TeardownSaga, TunnelError, TunnelRequest, TunnelSaga,
};
