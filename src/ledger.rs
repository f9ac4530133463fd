//! Provisioning ledger: progress lines and audit events for saga runs.
//!
//! Ledger writes are diagnostics, not control data. A failed write is logged
//! and never changes a saga's outcome.

use tracing::{info, warn};

use crate::store::{AuditKind, LedgerStore, NewAuditEvent};

/// Which saga a ledger line belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedgerScope {
    /// Lines written while creating a tunnel.
    Provisioning,
    /// Lines written while tearing a tunnel down.
    Deletion,
}

impl LedgerScope {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Provisioning => "[Tunnel]",
            Self::Deletion => "[Tunnel Deletion]",
        }
    }
}

/// Ledger handle scoped to one saga run.
pub struct ProvisioningLedger<'a, L: ?Sized> {
    store: &'a L,
    resource_id: &'a str,
    owner_id: &'a str,
    scope: LedgerScope,
}

impl<'a, L> ProvisioningLedger<'a, L>
where
    L: LedgerStore + ?Sized,
{
    /// Creates a ledger writing log lines under `resource_id` (the server id)
    /// on behalf of `owner_id`.
    #[must_use]
    pub const fn new(
        store: &'a L,
        resource_id: &'a str,
        owner_id: &'a str,
        scope: LedgerScope,
    ) -> Self {
        Self {
            store,
            resource_id,
            owner_id,
            scope,
        }
    }

    /// Appends one prefixed line to the provisioning log.
    pub async fn line(&self, text: &str) {
        let chunk = format!("{} {text}\n", self.scope.prefix());
        info!(resource = self.resource_id, "{}", chunk.trim_end());
        if let Err(err) = self.store.append_log(self.resource_id, &chunk).await {
            warn!(
                resource = self.resource_id,
                error = %err,
                "failed to append provisioning log"
            );
        }
    }

    /// Records the saga outcome in the audit trail.
    pub async fn audit(&self, kind: AuditKind, tunnel_record_id: Option<&str>, description: String) {
        let event = NewAuditEvent {
            owner_id: self.owner_id.to_owned(),
            server_id: self.resource_id.to_owned(),
            tunnel_record_id: tunnel_record_id.map(str::to_owned),
            kind,
            description,
        };
        if let Err(err) = self.store.record_audit(&event).await {
            warn!(
                resource = self.resource_id,
                kind = %kind,
                error = %err,
                "failed to record audit event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    #[tokio::test]
    async fn lines_carry_scope_prefix() {
        let store = MemoryStore::new();
        ProvisioningLedger::new(&store, "srv-1", "owner-1", LedgerScope::Provisioning)
            .line("Creating tunnel")
            .await;
        ProvisioningLedger::new(&store, "srv-1", "owner-1", LedgerScope::Deletion)
            .line("Stopping service")
            .await;

        assert_eq!(
            store.log_chunks("srv-1"),
            [
                "[Tunnel] Creating tunnel\n",
                "[Tunnel Deletion] Stopping service\n"
            ]
        );
    }

    #[tokio::test]
    async fn write_failures_do_not_propagate() {
        let store = MemoryStore::new();
        store.fail_ledger_writes();
        let ledger = ProvisioningLedger::new(&store, "srv-1", "owner-1", LedgerScope::Provisioning);

        ledger.line("Creating tunnel").await;
        ledger
            .audit(AuditKind::TunnelCreated, Some("rec-1"), String::from("ok"))
            .await;

        assert!(store.log_chunks("srv-1").is_empty());
        assert!(store.audit_kinds("srv-1").is_empty());
    }

    #[tokio::test]
    async fn audit_records_owner_and_record() {
        let store = MemoryStore::new();
        ProvisioningLedger::new(&store, "srv-1", "owner-1", LedgerScope::Provisioning)
            .audit(
                AuditKind::TunnelCreated,
                Some("rec-1"),
                String::from("Tunnel created"),
            )
            .await;

        let events = store.audit_log("srv-1");
        let event = events
            .first()
            .unwrap_or_else(|| panic!("audit event should be recorded"));
        assert_eq!(event.owner_id, "owner-1");
        assert_eq!(event.tunnel_record_id.as_deref(), Some("rec-1"));
        assert_eq!(event.kind, AuditKind::TunnelCreated);
    }
}
