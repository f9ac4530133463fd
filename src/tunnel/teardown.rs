//! Reverse orchestration: remove a tunnel and everything it created.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{Instrument, error, info, info_span, warn};

use super::error::{SagaStep, TunnelError};
use super::remote_config::{DAEMON_RELOAD, RemoteLayout, TunnelFiles, remove_file_command};
use super::{DEFAULT_STEP_TIMEOUT, TeardownRequest};
use crate::control_plane::ControlPlane;
use crate::ledger::{LedgerScope, ProvisioningLedger};
use crate::remote::RemoteExecutor;
use crate::store::{AuditKind, LedgerStore, TunnelRecord, TunnelStore};

/// Tears tunnels down. Remote cleanup is best effort; the control-plane
/// tunnel must be gone before the record is removed.
#[derive(Debug)]
pub struct TeardownSaga<C, R, S> {
    control_plane: C,
    executor: R,
    store: S,
    layout: RemoteLayout,
    step_timeout: Duration,
}

impl<C, R, S> TeardownSaga<C, R, S>
where
    C: ControlPlane,
    R: RemoteExecutor,
    S: TunnelStore + LedgerStore,
{
    /// Creates a teardown saga over the supplied collaborators.
    #[must_use]
    pub const fn new(control_plane: C, executor: R, store: S, layout: RemoteLayout) -> Self {
        Self {
            control_plane,
            executor,
            store,
            layout,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Overrides the per-step timeout.
    #[must_use]
    pub const fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Removes the tunnel identified by `request.record_id`.
    ///
    /// Records in any status may be torn down. Remote cleanup failures are
    /// logged and tolerated. Control-plane deletes treat not-found as done;
    /// any other failure keeps the record so the teardown can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::NotFound`] when the record is missing or owned
    /// by someone else, [`TunnelError::CredentialMismatch`] when the request
    /// carries credentials for another server or domain, and [`TunnelError::ControlPlane`],
    /// [`TunnelError::Timeout`] or [`TunnelError::Persistence`] when a
    /// mandatory step fails.
    pub async fn delete(&self, request: &TeardownRequest) -> Result<(), TunnelError> {
        let span = info_span!(
            "tunnel_delete",
            owner = %request.owner_id,
            record = %request.record_id
        );
        self.delete_in_span(request).instrument(span).await
    }

    async fn delete_in_span(&self, request: &TeardownRequest) -> Result<(), TunnelError> {
        let record = self.load(request).await?;
        let ledger = ProvisioningLedger::new(
            &self.store,
            &record.server_id,
            &request.owner_id,
            LedgerScope::Deletion,
        );
        ledger
            .line(&format!(
                "Deleting tunnel {} for {}",
                record.id, record.full_domain
            ))
            .await;

        match self.remove(request, &record, &ledger).await {
            Ok(()) => {
                ledger.line("Tunnel deleted").await;
                ledger
                    .audit(
                        AuditKind::TunnelDeleted,
                        Some(&record.id),
                        format!("Tunnel deleted for {}", record.full_domain),
                    )
                    .await;
                info!(record = %record.id, "tunnel deleted");
                Ok(())
            }
            Err(err) => {
                error!(record = %record.id, error = %err, "tunnel teardown failed");
                ledger.line(&format!("Error: {err}")).await;
                ledger
                    .audit(
                        AuditKind::TunnelDeleteFailed,
                        Some(&record.id),
                        format!("Tunnel deletion failed for {}: {err}", record.full_domain),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn load(&self, request: &TeardownRequest) -> Result<TunnelRecord, TunnelError> {
        let found = self
            .bounded(SagaStep::LoadRecord, async {
                self.store
                    .find(&request.record_id)
                    .await
                    .map_err(|err| TunnelError::persistence(SagaStep::LoadRecord, err))
            })
            .await?;
        let record = match found {
            Some(record) if record.owner_id == request.owner_id => record,
            Some(_) | None => return Err(TunnelError::NotFound(request.record_id.clone())),
        };
        for (kind, expected, supplied) in [
            ("server", &record.server_id, &request.server_id),
            (
                "domain credential",
                &record.domain_credential_id,
                &request.domain_credential_id,
            ),
        ] {
            if expected != supplied {
                warn!(
                    record = %record.id,
                    kind,
                    %expected,
                    %supplied,
                    "teardown credentials do not match record"
                );
                return Err(TunnelError::CredentialMismatch {
                    record_id: record.id.clone(),
                    kind,
                    expected: expected.clone(),
                    supplied: supplied.clone(),
                });
            }
        }
        Ok(record)
    }

    async fn remove(
        &self,
        request: &TeardownRequest,
        record: &TunnelRecord,
        ledger: &ProvisioningLedger<'_, S>,
    ) -> Result<(), TunnelError> {
        self.clean_remote(request, record, ledger).await;

        if let Some(tunnel_id) = &record.tunnel_id {
            self.bounded(SagaStep::DeleteTunnel, async {
                self.control_plane
                    .delete_tunnel(&request.domain, tunnel_id)
                    .await
                    .map_err(|err| TunnelError::control_plane(SagaStep::DeleteTunnel, err))
            })
            .await?;
            ledger.line(&format!("Deleted tunnel {tunnel_id}")).await;
        } else {
            ledger.line("No tunnel id recorded; skipping tunnel deletion").await;
        }

        if let Some(dns_record_id) = &record.dns_record_id {
            self.bounded(SagaStep::DeleteDnsRecord, async {
                self.control_plane
                    .delete_dns_record(&request.domain, dns_record_id)
                    .await
                    .map_err(|err| TunnelError::control_plane(SagaStep::DeleteDnsRecord, err))
            })
            .await?;
            ledger.line(&format!("Deleted DNS record {dns_record_id}")).await;
        } else {
            warn!(record = %record.id, "no DNS record id recorded");
            ledger.line("No DNS record id recorded; skipping DNS deletion").await;
        }

        self.bounded(SagaStep::DeleteRecord, async {
            self.store
                .delete(&record.id)
                .await
                .map_err(|err| TunnelError::persistence(SagaStep::DeleteRecord, err))
        })
        .await
    }

    async fn clean_remote(
        &self,
        request: &TeardownRequest,
        record: &TunnelRecord,
        ledger: &ProvisioningLedger<'_, S>,
    ) {
        let files = TunnelFiles::new(&self.layout, &record.id);
        let mut commands = vec![
            (format!("stop {}", files.unit_name), files.stop_command()),
            (format!("disable {}", files.unit_name), files.disable_command()),
        ];
        commands.extend(
            files
                .removable()
                .into_iter()
                .map(|path| (format!("remove {path}"), remove_file_command(path))),
        );
        commands.push((format!("remove {}", files.dir), files.remove_dir_command()));
        commands.push((String::from("reload systemd"), DAEMON_RELOAD.to_owned()));

        for (action, command) in commands {
            match self.best_effort(request, &command).await {
                Ok(()) => ledger.line(&format!("Completed: {action}")).await,
                Err(message) => {
                    warn!(record = %record.id, action = %action, error = %message, "remote cleanup step failed");
                    ledger
                        .line(&format!("Warning: could not {action}: {message}"))
                        .await;
                }
            }
        }
    }

    async fn best_effort(&self, request: &TeardownRequest, command: &str) -> Result<(), String> {
        match timeout(self.step_timeout, self.executor.exec(&request.server, command)).await {
            Ok(Ok(output)) if output.is_success() => Ok(()),
            Ok(Ok(output)) => Err(output.failure_summary()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.step_timeout.as_secs())),
        }
    }

    async fn bounded<T, F>(&self, step: SagaStep, operation: F) -> Result<T, TunnelError>
    where
        F: Future<Output = Result<T, TunnelError>>,
    {
        timeout(self.step_timeout, operation)
            .await
            .map_err(|_| TunnelError::Timeout {
                step,
                after: self.step_timeout,
            })?
    }
}
