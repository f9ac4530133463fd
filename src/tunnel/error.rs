//! Error types for the tunnel sagas.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::control_plane::ControlPlaneError;
use crate::remote::RemoteError;
use crate::store::StoreError;

/// Named step of a saga, used in errors and ledger lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SagaStep {
    /// Looking for an existing live record.
    IdempotencyCheck,
    /// Writing the tunnel record.
    PersistRecord,
    /// Creating the external tunnel.
    CreateTunnel,
    /// Creating the DNS record.
    CreateDnsRecord,
    /// Writing files and starting the remote service.
    ConfigureRemote,
    /// Checking the remote service is running.
    VerifyService,
    /// Marking the record active.
    Finalize,
    /// Loading the record for teardown.
    LoadRecord,
    /// Deleting the external tunnel.
    DeleteTunnel,
    /// Deleting the DNS record.
    DeleteDnsRecord,
    /// Removing the tunnel record.
    DeleteRecord,
}

impl SagaStep {
    /// Human-readable step label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::IdempotencyCheck => "idempotency check",
            Self::PersistRecord => "persist tunnel record",
            Self::CreateTunnel => "create tunnel",
            Self::CreateDnsRecord => "create DNS record",
            Self::ConfigureRemote => "configure remote host",
            Self::VerifyService => "verify tunnel service",
            Self::Finalize => "finalize tunnel record",
            Self::LoadRecord => "load tunnel record",
            Self::DeleteTunnel => "delete tunnel",
            Self::DeleteDnsRecord => "delete DNS record",
            Self::DeleteRecord => "delete tunnel record",
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

/// Errors returned by [`super::TunnelSaga`] and [`super::TeardownSaga`].
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The request was rejected before any side effect.
    #[error("invalid tunnel request: {0}")]
    InvalidRequest(String),
    /// A live tunnel already exists for the (server, container, port) triple.
    #[error("a tunnel for container {container_id} port {container_port} on server {server_id} already exists")]
    Conflict {
        /// Server identifier.
        server_id: String,
        /// Container identifier.
        container_id: String,
        /// Container port.
        container_port: u16,
    },
    /// The record does not exist or belongs to another owner.
    #[error("tunnel {0} not found")]
    NotFound(String),
    /// Teardown was given credentials other than the ones the record was
    /// provisioned with.
    #[error("tunnel {record_id} was provisioned with {kind} {expected}, not {supplied}")]
    CredentialMismatch {
        /// Tunnel record identifier.
        record_id: String,
        /// Which credential differs (`server` or `domain credential`).
        kind: &'static str,
        /// Reference stored on the record.
        expected: String,
        /// Reference supplied with the request.
        supplied: String,
    },
    /// The control plane answered with an unusable response.
    #[error("{step} returned an invalid response: {source}")]
    Validation {
        /// Step that failed.
        step: SagaStep,
        /// Underlying client error.
        #[source]
        source: ControlPlaneError,
    },
    /// The control plane rejected or failed a call.
    #[error("{step} failed: {source}")]
    ControlPlane {
        /// Step that failed.
        step: SagaStep,
        /// Underlying client error.
        #[source]
        source: ControlPlaneError,
    },
    /// A remote command failed or the host was unreachable.
    #[error("{step} failed: {message}")]
    RemoteExecution {
        /// Step that failed.
        step: SagaStep,
        /// Human-readable description of the failure.
        message: String,
        /// Transport error, when the command could not run at all.
        #[source]
        source: Option<RemoteError>,
    },
    /// The metadata store failed.
    #[error("{step} failed: {source}")]
    Persistence {
        /// Step that failed.
        step: SagaStep,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// A step exceeded its time limit.
    #[error("{step} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Step that timed out.
        step: SagaStep,
        /// Limit that was exceeded.
        after: Duration,
    },
}

impl TunnelError {
    /// Wraps a control-plane error, separating malformed responses from
    /// rejected calls.
    #[must_use]
    pub fn control_plane(step: SagaStep, source: ControlPlaneError) -> Self {
        if matches!(source, ControlPlaneError::Validation(_)) {
            Self::Validation { step, source }
        } else {
            Self::ControlPlane { step, source }
        }
    }

    /// Wraps a remote transport error.
    #[must_use]
    pub fn remote(step: SagaStep, source: RemoteError) -> Self {
        Self::RemoteExecution {
            step,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Wraps a store error.
    #[must_use]
    pub const fn persistence(step: SagaStep, source: StoreError) -> Self {
        Self::Persistence { step, source }
    }
}

/// Failure of a single compensating action. Logged and recorded in the
/// ledger; never returned in place of the original error.
#[derive(Debug, Error)]
#[error("compensation '{action}' failed: {message}")]
pub struct CompensationError {
    /// Description of the compensating action.
    pub action: String,
    /// Human-readable description of the failure.
    pub message: String,
}
