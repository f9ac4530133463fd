//! Undo steps registered while a tunnel is being provisioned.

use std::fmt;

/// Reverses one forward step of the provisioning saga.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Compensation {
    /// Delete the external tunnel.
    DeleteTunnel {
        /// External tunnel identifier.
        tunnel_id: String,
    },
    /// Delete the DNS record.
    DeleteDnsRecord {
        /// External DNS record identifier.
        record_id: String,
    },
    /// Stop the remote service and remove its files.
    RemoveRemoteConfig,
}

impl fmt::Display for Compensation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteTunnel { tunnel_id } => write!(formatter, "delete tunnel {tunnel_id}"),
            Self::DeleteDnsRecord { record_id } => {
                write!(formatter, "delete DNS record {record_id}")
            }
            Self::RemoveRemoteConfig => formatter.write_str("remove remote configuration"),
        }
    }
}

/// Last-in, first-out list of pending compensations.
#[derive(Debug, Default)]
pub struct CompensationStack {
    pending: Vec<Compensation>,
}

impl CompensationStack {
    /// Registers an undo step for a forward step that just completed.
    pub fn push(&mut self, compensation: Compensation) {
        self.pending.push(compensation);
    }

    /// Takes the most recently registered undo step.
    pub fn pop(&mut self) -> Option<Compensation> {
        self.pending.pop()
    }
}
