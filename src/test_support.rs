//! Test support utilities shared across unit and integration tests.
//!
//! The doubles share their state behind an `Arc`, so a test can hand a clone
//! to a saga and keep another clone for scripting failures and asserting on
//! what happened.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use chrono::{TimeZone, Utc};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::control_plane::{
    ApiMessage, ControlPlane, ControlPlaneError, ControlPlaneFuture, CreatedDnsRecord,
    CreatedTunnel, DnsRecordRequest,
};
use crate::credentials::{DomainCredential, ServerCredential, ServerSecret};
use crate::remote::{RemoteError, RemoteExecutor, RemoteFuture, RemoteOutput};
use crate::store::{
    AuditEvent, AuditKind, LedgerStore, LogEntry, NewAuditEvent, StoreError, StoreFuture,
    TunnelRecord, TunnelStatus, TunnelStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Server credential pointing at a host that is never contacted.
#[must_use]
pub fn sample_server() -> ServerCredential {
    ServerCredential {
        host: String::from("203.0.113.10"),
        port: 22,
        username: String::from("root"),
        secret: ServerSecret::Password {
            password: String::from("hunter2"),
        },
    }
}

/// Domain credential for `example.com`.
#[must_use]
pub fn sample_domain() -> DomainCredential {
    DomainCredential {
        domain_name: String::from("example.com"),
        api_token: String::from("cf-token-0123456789"),
        zone_id: String::from("zone-1"),
        account_id: String::from("account-1"),
    }
}

/// Provisioning record for `srv-1`/`ctr-1`/8080 with the given id and status.
#[must_use]
pub fn sample_record(id: &str, status: TunnelStatus) -> TunnelRecord {
    let stamp = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    TunnelRecord {
        id: id.to_owned(),
        owner_id: String::from("owner-1"),
        server_id: String::from("srv-1"),
        container_id: String::from("ctr-1"),
        domain_credential_id: String::from("dom-1"),
        subdomain: String::from("app"),
        full_domain: String::from("app.example.com"),
        container_port: 8080,
        host_port: 32768,
        tunnel_id: None,
        tunnel_secret: None,
        dns_record_id: None,
        status,
        error_message: None,
        created_at: stamp,
        updated_at: stamp,
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<TunnelRecord>,
    logs: Vec<LogEntry>,
    audits: Vec<AuditEvent>,
    sequence: i64,
    fail_insert: bool,
    fail_update: bool,
    fail_delete: bool,
    fail_ledger: bool,
    hide_live: bool,
    stall_failed_updates: Option<Duration>,
}

impl MemoryState {
    fn next_sequence(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn live_conflict(&self, candidate: &TunnelRecord) -> bool {
        candidate.status.is_live()
            && self.records.iter().any(|existing| {
                existing.id != candidate.id
                    && existing.status.is_live()
                    && existing.server_id == candidate.server_id
                    && existing.container_id == candidate.container_id
                    && existing.container_port == candidate.container_port
            })
    }
}

/// In-memory [`TunnelStore`] and [`LedgerStore`] enforcing the same
/// live-triple rule as the database index.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing the live-triple rule.
    pub fn seed(&self, record: TunnelRecord) {
        lock(&self.state).records.push(record);
    }

    /// Snapshot of all records in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<TunnelRecord> {
        lock(&self.state).records.clone()
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<TunnelRecord> {
        lock(&self.state)
            .records
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Makes every insert fail with a backend error.
    pub fn fail_insert(&self) {
        lock(&self.state).fail_insert = true;
    }

    /// Makes every update fail with a backend error.
    pub fn fail_update(&self) {
        lock(&self.state).fail_update = true;
    }

    /// Makes every delete fail with a backend error.
    pub fn fail_delete(&self) {
        lock(&self.state).fail_delete = true;
    }

    /// Makes `find_live` report no match, as when a concurrent request
    /// inserts between the check and the insert.
    pub fn hide_live_records(&self) {
        lock(&self.state).hide_live = true;
    }

    /// Delays every update that marks a record `failed` by `delay`.
    pub fn stall_failed_updates(&self, delay: Duration) {
        lock(&self.state).stall_failed_updates = Some(delay);
    }

    /// Makes log appends and audit writes fail.
    pub fn fail_ledger_writes(&self) {
        lock(&self.state).fail_ledger = true;
    }

    /// Log chunks appended under `resource_id`, oldest first.
    #[must_use]
    pub fn log_chunks(&self, resource_id: &str) -> Vec<String> {
        lock(&self.state)
            .logs
            .iter()
            .filter(|entry| entry.resource_id == resource_id)
            .map(|entry| entry.chunk.clone())
            .collect()
    }

    /// Audit kinds recorded for `server_id`, oldest first.
    #[must_use]
    pub fn audit_kinds(&self, server_id: &str) -> Vec<AuditKind> {
        self.audit_log(server_id)
            .into_iter()
            .map(|event| event.kind)
            .collect()
    }

    /// Audit events recorded for `server_id`, oldest first.
    #[must_use]
    pub fn audit_log(&self, server_id: &str) -> Vec<NewAuditEvent> {
        lock(&self.state)
            .audits
            .iter()
            .filter(|audit| audit.event.server_id == server_id)
            .map(|audit| audit.event.clone())
            .collect()
    }
}

fn backend_failure(operation: &str) -> StoreError {
    StoreError::Backend(format!("simulated {operation} failure"))
}

impl TunnelStore for MemoryStore {
    fn find_live<'a>(
        &'a self,
        server_id: &'a str,
        container_id: &'a str,
        container_port: u16,
    ) -> StoreFuture<'a, Option<TunnelRecord>> {
        Box::pin(async move {
            let state = lock(&self.state);
            if state.hide_live {
                return Ok(None);
            }
            Ok(state
                .records
                .iter()
                .find(|record| {
                    record.status.is_live()
                        && record.server_id == server_id
                        && record.container_id == container_id
                        && record.container_port == container_port
                })
                .cloned())
        })
    }

    fn insert<'a>(&'a self, record: &'a TunnelRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.fail_insert {
                return Err(backend_failure("insert"));
            }
            if state.live_conflict(record) {
                return Err(StoreError::Conflict(format!(
                    "{}/{}/{}",
                    record.server_id, record.container_id, record.container_port
                )));
            }
            state.records.push(record.clone());
            Ok(())
        })
    }

    fn update<'a>(&'a self, record: &'a TunnelRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let stall = lock(&self.state)
                .stall_failed_updates
                .filter(|_| record.status == TunnelStatus::Failed);
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }
            let mut state = lock(&self.state);
            if state.fail_update {
                return Err(backend_failure("update"));
            }
            if state.live_conflict(record) {
                return Err(StoreError::Conflict(record.id.clone()));
            }
            let slot = state
                .records
                .iter_mut()
                .find(|existing| existing.id == record.id)
                .ok_or_else(|| StoreError::Backend(format!("record {} missing", record.id)))?;
            *slot = record.clone();
            Ok(())
        })
    }

    fn find<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<TunnelRecord>> {
        Box::pin(async move { Ok(self.record(id)) })
    }

    fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.fail_delete {
                return Err(backend_failure("delete"));
            }
            state.records.retain(|record| record.id != id);
            Ok(())
        })
    }

    fn list_for_server<'a>(&'a self, server_id: &'a str) -> StoreFuture<'a, Vec<TunnelRecord>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .records
                .iter()
                .filter(|record| record.server_id == server_id)
                .cloned()
                .collect())
        })
    }
}

impl LedgerStore for MemoryStore {
    fn append_log<'a>(&'a self, resource_id: &'a str, chunk: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.fail_ledger {
                return Err(backend_failure("log append"));
            }
            let sequence = state.next_sequence();
            state.logs.push(LogEntry {
                sequence,
                resource_id: resource_id.to_owned(),
                chunk: chunk.to_owned(),
                created_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn read_log<'a>(&'a self, resource_id: &'a str) -> StoreFuture<'a, Vec<LogEntry>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .logs
                .iter()
                .filter(|entry| entry.resource_id == resource_id)
                .cloned()
                .collect())
        })
    }

    fn record_audit<'a>(&'a self, event: &'a NewAuditEvent) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.fail_ledger {
                return Err(backend_failure("audit"));
            }
            let sequence = state.next_sequence();
            state.audits.push(AuditEvent {
                sequence,
                event: event.clone(),
                created_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn audit_events<'a>(&'a self, server_id: &'a str) -> StoreFuture<'a, Vec<AuditEvent>> {
        Box::pin(async move {
            Ok(lock(&self.state)
                .audits
                .iter()
                .filter(|audit| audit.event.server_id == server_id)
                .cloned()
                .collect())
        })
    }
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    next_id: u32,
    tunnels: Vec<String>,
    dns_records: Vec<String>,
    calls: Vec<String>,
    fail_create_tunnel: bool,
    fail_create_dns: bool,
    fail_delete_tunnel: bool,
    fail_delete_dns: bool,
    stall_create_dns: Option<Duration>,
}

impl ControlPlaneState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

fn api_failure(status: u16, code: i64, message: &str) -> ControlPlaneError {
    ControlPlaneError::Api {
        status,
        errors: vec![ApiMessage {
            code: Some(code),
            message: message.to_owned(),
        }],
        message: format!("({code}) {message}"),
        enveloped: true,
    }
}

/// [`ControlPlane`] double tracking which resources currently exist.
///
/// Deleting an unknown id succeeds, mirroring the client's not-found
/// handling.
#[derive(Clone, Debug, Default)]
pub struct ScriptedControlPlane {
    state: Arc<Mutex<ControlPlaneState>>,
}

impl ScriptedControlPlane {
    /// Creates a control plane with no resources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes tunnel creation fail with an authentication error.
    pub fn fail_create_tunnel(&self) {
        lock(&self.state).fail_create_tunnel = true;
    }

    /// Makes DNS creation fail with `(1003) Invalid zone`.
    pub fn fail_create_dns(&self) {
        lock(&self.state).fail_create_dns = true;
    }

    /// Makes tunnel deletion fail with a server error.
    pub fn fail_delete_tunnel(&self) {
        lock(&self.state).fail_delete_tunnel = true;
    }

    /// Makes DNS deletion fail with a server error.
    pub fn fail_delete_dns(&self) {
        lock(&self.state).fail_delete_dns = true;
    }

    /// Makes DNS creation sleep for `delay` before answering.
    pub fn stall_create_dns(&self, delay: Duration) {
        lock(&self.state).stall_create_dns = Some(delay);
    }

    /// Tunnels that currently exist.
    #[must_use]
    pub fn tunnels(&self) -> Vec<String> {
        lock(&self.state).tunnels.clone()
    }

    /// DNS records that currently exist.
    #[must_use]
    pub fn dns_records(&self) -> Vec<String> {
        lock(&self.state).dns_records.clone()
    }

    /// Calls received so far, for example `delete_tunnel tun-1`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }
}

impl ControlPlane for ScriptedControlPlane {
    fn create_tunnel<'a>(
        &'a self,
        _auth: &'a DomainCredential,
        name: &'a str,
    ) -> ControlPlaneFuture<'a, CreatedTunnel> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(format!("create_tunnel {name}"));
            if state.fail_create_tunnel {
                return Err(api_failure(403, 10000, "Authentication error"));
            }
            let id = state.allocate("tun");
            state.tunnels.push(id.clone());
            Ok(CreatedTunnel {
                secret: format!("secret-for-{id}"),
                id,
            })
        })
    }

    fn delete_tunnel<'a>(
        &'a self,
        _auth: &'a DomainCredential,
        tunnel_id: &'a str,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(format!("delete_tunnel {tunnel_id}"));
            if state.fail_delete_tunnel {
                return Err(api_failure(500, 1000, "Internal server error"));
            }
            state.tunnels.retain(|id| id != tunnel_id);
            Ok(())
        })
    }

    fn create_dns_record<'a>(
        &'a self,
        _auth: &'a DomainCredential,
        record: &'a DnsRecordRequest,
    ) -> ControlPlaneFuture<'a, CreatedDnsRecord> {
        Box::pin(async move {
            let stall = {
                let mut state = lock(&self.state);
                state.calls.push(format!("create_dns_record {}", record.name));
                state.stall_create_dns
            };
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }
            let mut state = lock(&self.state);
            if state.fail_create_dns {
                return Err(api_failure(400, 1003, "Invalid zone"));
            }
            let id = state.allocate("dns");
            state.dns_records.push(id.clone());
            Ok(CreatedDnsRecord { id })
        })
    }

    fn delete_dns_record<'a>(
        &'a self,
        _auth: &'a DomainCredential,
        record_id: &'a str,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.calls.push(format!("delete_dns_record {record_id}"));
            if state.fail_delete_dns {
                return Err(api_failure(500, 1000, "Internal server error"));
            }
            state.dns_records.retain(|id| id != record_id);
            Ok(())
        })
    }
}

/// File written through [`ScriptedExecutor`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WrittenFile {
    /// Remote path.
    pub path: String,
    /// Content decoded as UTF-8.
    pub content: String,
    /// Requested permission bits.
    pub mode: Option<u32>,
}

#[derive(Debug)]
enum Script {
    Output(RemoteOutput),
    Unreachable,
}

#[derive(Debug, Default)]
struct ExecutorState {
    commands: Vec<String>,
    writes: Vec<WrittenFile>,
    scripts: Vec<(String, Script)>,
    failing_writes: Vec<String>,
}

/// [`RemoteExecutor`] double that records commands and file writes.
///
/// Commands succeed with empty output unless a script matches;
/// `systemctl is-active` reports `active`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ExecutorState>>,
}

impl ScriptedExecutor {
    /// Creates an executor where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands containing `pattern` with `exit_code` and `stderr`.
    pub fn fail_when_contains(&self, pattern: &str, exit_code: i32, stderr: &str) {
        lock(&self.state).scripts.push((
            pattern.to_owned(),
            Script::Output(RemoteOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_owned(),
            }),
        ));
    }

    /// Answers commands containing `pattern` with custom output.
    pub fn respond_when_contains(&self, pattern: &str, output: RemoteOutput) {
        lock(&self.state)
            .scripts
            .push((pattern.to_owned(), Script::Output(output)));
    }

    /// Fails commands containing `pattern` with a connection error.
    pub fn unreachable_when_contains(&self, pattern: &str) {
        lock(&self.state)
            .scripts
            .push((pattern.to_owned(), Script::Unreachable));
    }

    /// Makes writes to paths containing `pattern` fail.
    pub fn fail_writes_to(&self, pattern: &str) {
        lock(&self.state).failing_writes.push(pattern.to_owned());
    }

    /// Commands executed so far, oldest first.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Files written so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<WrittenFile> {
        lock(&self.state).writes.clone()
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn exec<'a>(
        &'a self,
        credential: &'a ServerCredential,
        command: &'a str,
    ) -> RemoteFuture<'a, RemoteOutput> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.commands.push(command.to_owned());
            let scripted = state
                .scripts
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, script)| script);
            match scripted {
                Some(Script::Output(output)) => Ok(output.clone()),
                Some(Script::Unreachable) => Err(RemoteError::Connect {
                    host: credential.host.clone(),
                    message: String::from("connection refused"),
                }),
                None if command.starts_with("systemctl is-active") => Ok(RemoteOutput {
                    exit_code: Some(0),
                    stdout: String::from("active\n"),
                    stderr: String::new(),
                }),
                None => Ok(RemoteOutput {
                    exit_code: Some(0),
                    ..RemoteOutput::default()
                }),
            }
        })
    }

    fn write_file<'a>(
        &'a self,
        _credential: &'a ServerCredential,
        path: &'a Utf8Path,
        content: &'a [u8],
        mode: Option<u32>,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state
                .failing_writes
                .iter()
                .any(|pattern| path.as_str().contains(pattern.as_str()))
            {
                return Err(RemoteError::CommandFailure {
                    action: format!("writing {path}"),
                    summary: String::from("exited with status 1: No space left on device"),
                });
            }
            state.writes.push(WrittenFile {
                path: path.to_string(),
                content: String::from_utf8_lossy(content).into_owned(),
                mode,
            });
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
