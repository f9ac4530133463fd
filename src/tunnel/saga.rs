//! Forward orchestration: expose a container port through a tunnel.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::compensation::{Compensation, CompensationStack};
use super::error::{CompensationError, SagaStep, TunnelError};
use super::remote_config::{
    CONFIG_MODE, CREDENTIALS_MODE, RemoteLayout, TunnelFiles, render_config, render_credentials,
    render_unit,
};
use super::subdomain::{generate_subdomain, tunnel_name};
use super::{DEFAULT_STEP_TIMEOUT, TunnelRequest};
use crate::control_plane::{ControlPlane, CreatedTunnel, DnsRecordRequest};
use crate::ledger::{LedgerScope, ProvisioningLedger};
use crate::remote::RemoteExecutor;
use crate::store::{AuditKind, LedgerStore, StoreError, TunnelRecord, TunnelStatus, TunnelStore};

/// Provisions tunnels, compensating every completed step when a later one
/// fails.
#[derive(Debug)]
pub struct TunnelSaga<C, R, S> {
    control_plane: C,
    executor: R,
    store: S,
    layout: RemoteLayout,
    step_timeout: Duration,
}

impl<C, R, S> TunnelSaga<C, R, S>
where
    C: ControlPlane,
    R: RemoteExecutor,
    S: TunnelStore + LedgerStore,
{
    /// Creates a saga over the supplied collaborators.
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

    /// Provisions a tunnel and returns the active record.
    ///
    /// The record is inserted before any external resource exists and every
    /// external id is persisted onto it as soon as it is known. On failure
    /// the completed steps are compensated in reverse order, the record is
    /// marked `failed`, and the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::InvalidRequest`] or [`TunnelError::Conflict`]
    /// without side effects; any other variant after compensation.
    pub async fn create(&self, request: &TunnelRequest) -> Result<TunnelRecord, TunnelError> {
        let span = info_span!(
            "tunnel_create",
            owner = %request.owner_id,
            server = %request.server_id,
            container = %request.container_id,
            port = request.container_port
        );
        self.create_in_span(request).instrument(span).await
    }

    async fn create_in_span(&self, request: &TunnelRequest) -> Result<TunnelRecord, TunnelError> {
        request.validate()?;
        self.ensure_no_live_tunnel(request).await?;

        let ledger = ProvisioningLedger::new(
            &self.store,
            &request.server_id,
            &request.owner_id,
            LedgerScope::Provisioning,
        );
        let mut record = new_record(request);
        ledger
            .line(&format!(
                "Creating tunnel for {} (container {} port {})",
                record.full_domain, record.container_id, record.container_port
            ))
            .await;

        if let Err(err) = self.store.insert(&record).await {
            return Err(self.reject_insert(request, &ledger, err).await);
        }

        let mut compensations = CompensationStack::default();
        match self
            .provision(request, &mut record, &mut compensations, &ledger)
            .await
        {
            Ok(()) => {
                let description = format!(
                    "Tunnel created for {} (tunnel {}, DNS record {})",
                    record.full_domain,
                    record.tunnel_id.as_deref().unwrap_or("unknown"),
                    record.dns_record_id.as_deref().unwrap_or("unknown"),
                );
                ledger
                    .audit(AuditKind::TunnelCreated, Some(&record.id), description)
                    .await;
                info!(record = %record.id, domain = %record.full_domain, "tunnel active");
                Ok(record)
            }
            Err(err) => Err(self.fail(request, record, compensations, err, &ledger).await),
        }
    }

    async fn ensure_no_live_tunnel(&self, request: &TunnelRequest) -> Result<(), TunnelError> {
        let existing = self
            .store
            .find_live(
                &request.server_id,
                &request.container_id,
                request.container_port,
            )
            .await
            .map_err(|err| TunnelError::persistence(SagaStep::IdempotencyCheck, err))?;
        if let Some(live) = existing {
            info!(record = %live.id, status = %live.status, "live tunnel already exists");
            return Err(conflict(request));
        }
        Ok(())
    }

    async fn reject_insert(
        &self,
        request: &TunnelRequest,
        ledger: &ProvisioningLedger<'_, S>,
        err: StoreError,
    ) -> TunnelError {
        if matches!(err, StoreError::Conflict(_)) {
            info!("lost race for tunnel triple");
            return conflict(request);
        }
        let failure = TunnelError::persistence(SagaStep::PersistRecord, err);
        ledger.line(&format!("Error: {failure}")).await;
        ledger
            .audit(
                AuditKind::TunnelCreateFailed,
                None,
                format!("Tunnel creation failed: {failure}"),
            )
            .await;
        failure
    }

    async fn provision(
        &self,
        request: &TunnelRequest,
        record: &mut TunnelRecord,
        compensations: &mut CompensationStack,
        ledger: &ProvisioningLedger<'_, S>,
    ) -> Result<(), TunnelError> {
        let name = tunnel_name(&request.container_id);
        let tunnel = self
            .bounded(SagaStep::CreateTunnel, async {
                self.control_plane
                    .create_tunnel(&request.domain, &name)
                    .await
                    .map_err(|err| TunnelError::control_plane(SagaStep::CreateTunnel, err))
            })
            .await?;
        compensations.push(Compensation::DeleteTunnel {
            tunnel_id: tunnel.id.clone(),
        });
        ledger.line(&format!("Created tunnel {name} with id {}", tunnel.id)).await;
        record.tunnel_id = Some(tunnel.id.clone());
        record.tunnel_secret = Some(tunnel.secret.clone());
        self.save(SagaStep::CreateTunnel, record).await?;

        let dns_request = DnsRecordRequest::tunnel_cname(&record.full_domain, &tunnel.id);
        let dns = self
            .bounded(SagaStep::CreateDnsRecord, async {
                self.control_plane
                    .create_dns_record(&request.domain, &dns_request)
                    .await
                    .map_err(|err| TunnelError::control_plane(SagaStep::CreateDnsRecord, err))
            })
            .await?;
        compensations.push(Compensation::DeleteDnsRecord {
            record_id: dns.id.clone(),
        });
        ledger
            .line(&format!(
                "Created DNS record {} for {} -> {}",
                dns.id, record.full_domain, dns_request.content
            ))
            .await;
        record.dns_record_id = Some(dns.id);
        self.save(SagaStep::CreateDnsRecord, record).await?;

        let files = TunnelFiles::new(&self.layout, &record.id);
        compensations.push(Compensation::RemoveRemoteConfig);
        ledger
            .line(&format!("Configuring {} on {}", files.unit_name, request.server.host))
            .await;
        self.bounded(
            SagaStep::ConfigureRemote,
            self.configure_remote(request, record, &tunnel, &files),
        )
        .await?;
        ledger.line(&format!("Started {}", files.unit_name)).await;

        self.bounded(SagaStep::VerifyService, self.verify_service(request, &files))
            .await?;
        ledger.line(&format!("Verified {} is active", files.unit_name)).await;

        record.status = TunnelStatus::Active;
        record.error_message = None;
        self.save(SagaStep::Finalize, record).await?;
        ledger
            .line(&format!("Tunnel active at https://{}", record.full_domain))
            .await;
        Ok(())
    }

    async fn configure_remote(
        &self,
        request: &TunnelRequest,
        record: &TunnelRecord,
        tunnel: &CreatedTunnel,
        files: &TunnelFiles,
    ) -> Result<(), TunnelError> {
        let step = SagaStep::ConfigureRemote;
        let credentials =
            render_credentials(&request.domain.account_id, &tunnel.id, &tunnel.secret);
        let config = render_config(&tunnel.id, files, &record.full_domain, record.host_port);
        let unit = render_unit(&self.layout, files, &record.full_domain);

        for (path, content, mode) in [
            (&files.credentials, credentials, CREDENTIALS_MODE),
            (&files.config, config, CONFIG_MODE),
            (&files.unit, unit, CONFIG_MODE),
        ] {
            self.executor
                .write_file(&request.server, path, content.as_bytes(), Some(mode))
                .await
                .map_err(|err| TunnelError::remote(step, err))?;
        }

        let output = self
            .executor
            .exec(&request.server, &files.activate_command())
            .await
            .map_err(|err| TunnelError::remote(step, err))?;
        if !output.is_success() {
            return Err(TunnelError::RemoteExecution {
                step,
                message: format!("starting {} {}", files.unit_name, output.failure_summary()),
                source: None,
            });
        }
        Ok(())
    }

    async fn verify_service(
        &self,
        request: &TunnelRequest,
        files: &TunnelFiles,
    ) -> Result<(), TunnelError> {
        let step = SagaStep::VerifyService;
        let output = self
            .executor
            .exec(&request.server, &files.is_active_command())
            .await
            .map_err(|err| TunnelError::remote(step, err))?;
        let state = output.stdout.trim();
        if output.is_success() && state == "active" {
            return Ok(());
        }
        let reported = if state.is_empty() { "unknown" } else { state };
        Err(TunnelError::RemoteExecution {
            step,
            message: format!("{} is {reported}", files.unit_name),
            source: None,
        })
    }

    async fn save(&self, step: SagaStep, record: &mut TunnelRecord) -> Result<(), TunnelError> {
        record.updated_at = Utc::now();
        self.bounded(step, async {
            self.store
                .update(record)
                .await
                .map_err(|err| TunnelError::persistence(step, err))
        })
        .await
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

    async fn fail(
        &self,
        request: &TunnelRequest,
        mut record: TunnelRecord,
        compensations: CompensationStack,
        err: TunnelError,
        ledger: &ProvisioningLedger<'_, S>,
    ) -> TunnelError {
        error!(record = %record.id, error = %err, "tunnel provisioning failed");
        ledger.line(&format!("Error: {err}")).await;

        let failures = self
            .unwind(request, &record, compensations, ledger)
            .await;

        record.status = TunnelStatus::Failed;
        record.error_message = Some(err.to_string());
        record.updated_at = Utc::now();
        let marked = self
            .bounded(SagaStep::Finalize, async {
                self.store
                    .update(&record)
                    .await
                    .map_err(|store_err| TunnelError::persistence(SagaStep::Finalize, store_err))
            })
            .await;
        if let Err(mark_err) = marked {
            warn!(record = %record.id, error = %mark_err, "failed to mark tunnel record failed");
            ledger
                .line(&format!("Could not mark record {} failed: {mark_err}", record.id))
                .await;
        }

        let description = append_compensation_notes(
            format!("Tunnel creation failed for {}: {err}", record.full_domain),
            &failures,
        );
        ledger
            .audit(AuditKind::TunnelCreateFailed, Some(&record.id), description)
            .await;
        err
    }

    async fn unwind(
        &self,
        request: &TunnelRequest,
        record: &TunnelRecord,
        mut compensations: CompensationStack,
        ledger: &ProvisioningLedger<'_, S>,
    ) -> Vec<CompensationError> {
        let mut failures = Vec::new();
        while let Some(compensation) = compensations.pop() {
            ledger.line(&format!("Compensating: {compensation}")).await;
            match self.compensate(request, record, &compensation).await {
                Ok(()) => ledger.line(&format!("Compensated: {compensation}")).await,
                Err(failure) => {
                    warn!(error = %failure, "compensation failed");
                    ledger.line(&format!("Warning: {failure}")).await;
                    failures.push(failure);
                }
            }
        }
        failures
    }

    async fn compensate(
        &self,
        request: &TunnelRequest,
        record: &TunnelRecord,
        compensation: &Compensation,
    ) -> Result<(), CompensationError> {
        let action = compensation.to_string();
        let attempt = async {
            match compensation {
                Compensation::DeleteTunnel { tunnel_id } => self
                    .control_plane
                    .delete_tunnel(&request.domain, tunnel_id)
                    .await
                    .map_err(|err| err.to_string()),
                Compensation::DeleteDnsRecord { record_id } => self
                    .control_plane
                    .delete_dns_record(&request.domain, record_id)
                    .await
                    .map_err(|err| err.to_string()),
                Compensation::RemoveRemoteConfig => {
                    let files = TunnelFiles::new(&self.layout, &record.id);
                    let output = self
                        .executor
                        .exec(&request.server, &files.cleanup_command())
                        .await
                        .map_err(|err| err.to_string())?;
                    if output.is_success() {
                        Ok(())
                    } else {
                        Err(output.failure_summary())
                    }
                }
            }
        };

        match timeout(self.step_timeout, attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(CompensationError { action, message }),
            Err(_) => Err(CompensationError {
                action,
                message: format!("timed out after {}s", self.step_timeout.as_secs()),
            }),
        }
    }
}

fn new_record(request: &TunnelRequest) -> TunnelRecord {
    let subdomain = request
        .subdomain
        .clone()
        .unwrap_or_else(generate_subdomain);
    let full_domain = format!("{subdomain}.{}", request.domain.domain_name);
    let now = Utc::now();
    TunnelRecord {
        id: Uuid::new_v4().to_string(),
        owner_id: request.owner_id.clone(),
        server_id: request.server_id.clone(),
        container_id: request.container_id.clone(),
        domain_credential_id: request.domain_credential_id.clone(),
        subdomain,
        full_domain,
        container_port: request.container_port,
        host_port: request.host_port,
        tunnel_id: None,
        tunnel_secret: None,
        dns_record_id: None,
        status: TunnelStatus::Provisioning,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

fn conflict(request: &TunnelRequest) -> TunnelError {
    TunnelError::Conflict {
        server_id: request.server_id.clone(),
        container_id: request.container_id.clone(),
        container_port: request.container_port,
    }
}

fn append_compensation_notes(message: String, failures: &[CompensationError]) -> String {
    if failures.is_empty() {
        return message;
    }
    let notes = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{message} (cleanup also failed: {notes})")
}
