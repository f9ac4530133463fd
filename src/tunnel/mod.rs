//! Tunnel provisioning and teardown sagas.
//!
//! [`TunnelSaga`] exposes a container port through a control-plane tunnel,
//! a DNS record, and a supervised tunnel client on the remote host.
//! [`TeardownSaga`] removes all three. Both record progress in the
//! provisioning ledger and always leave the tunnel record in a truthful
//! terminal state.

use std::time::Duration;

use crate::credentials::{DomainCredential, ServerCredential};

mod compensation;
mod error;
mod remote_config;
mod saga;
mod subdomain;
mod teardown;

pub use compensation::{Compensation, CompensationStack};
pub use error::{CompensationError, SagaStep, TunnelError};
pub use remote_config::{
    CONFIG_MODE, CREDENTIALS_MODE, DAEMON_RELOAD, RemoteLayout, TunnelFiles, remove_file_command,
    render_config, render_credentials, render_unit,
};
pub use saga::TunnelSaga;
pub use subdomain::{GENERATED_SUBDOMAIN_LEN, generate_subdomain, is_valid_subdomain, tunnel_name};
pub use teardown::TeardownSaga;

/// Default upper bound for a single saga step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

/// Inputs for [`TunnelSaga::create`].
#[derive(Clone, Debug)]
pub struct TunnelRequest {
    /// Acting owner.
    pub owner_id: String,
    /// Server hosting the container.
    pub server_id: String,
    /// Container to expose.
    pub container_id: String,
    /// Reference to the domain credential.
    pub domain_credential_id: String,
    /// Port inside the container.
    pub container_port: u16,
    /// Port published on the host.
    pub host_port: u16,
    /// Requested label; a random one is generated when absent.
    pub subdomain: Option<String>,
    /// Resolved server credential.
    pub server: ServerCredential,
    /// Resolved domain credential.
    pub domain: DomainCredential,
}

impl TunnelRequest {
    /// Rejects requests that cannot be provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::InvalidRequest`] naming the first bad field.
    pub fn validate(&self) -> Result<(), TunnelError> {
        for (field, value) in [
            ("owner id", &self.owner_id),
            ("server id", &self.server_id),
            ("container id", &self.container_id),
            ("domain credential id", &self.domain_credential_id),
            ("domain name", &self.domain.domain_name),
        ] {
            if value.trim().is_empty() {
                return Err(TunnelError::InvalidRequest(format!("{field} must not be empty")));
            }
        }
        if self.container_port == 0 {
            return Err(TunnelError::InvalidRequest(String::from(
                "container port must be between 1 and 65535",
            )));
        }
        if self.host_port == 0 {
            return Err(TunnelError::InvalidRequest(String::from(
                "host port must be between 1 and 65535",
            )));
        }
        if let Some(label) = &self.subdomain
            && !is_valid_subdomain(label)
        {
            return Err(TunnelError::InvalidRequest(format!(
                "subdomain {label:?} must be 1-63 characters of a-z, 0-9 and inner hyphens"
            )));
        }
        Ok(())
    }
}

/// Inputs for [`TeardownSaga::delete`].
#[derive(Clone, Debug)]
pub struct TeardownRequest {
    /// Tunnel record to remove.
    pub record_id: String,
    /// Acting owner; must match the record.
    pub owner_id: String,
    /// Server the credential below was resolved for; must match the record.
    pub server_id: String,
    /// Domain credential reference the credential below was resolved for;
    /// must match the record.
    pub domain_credential_id: String,
    /// Resolved server credential.
    pub server: ServerCredential,
    /// Resolved domain credential.
    pub domain: DomainCredential,
}
