//! Teardown scenarios.

use rstest::rstest;
use vorota::test_support::sample_record;
use vorota::{AuditKind, TeardownRequest, TunnelError, TunnelRecord, TunnelRequest, TunnelStatus};

use super::test_helpers::{Harness, OWNER_ID, SERVER_ID, harness, request, teardown_request};

async fn provisioned(harness: &Harness, request: &TunnelRequest) -> TunnelRecord {
    harness
        .saga()
        .create(request)
        .await
        .unwrap_or_else(|err| panic!("provisioning should succeed: {err}"))
}

#[rstest]
#[tokio::test]
async fn create_then_delete_leaves_nothing_behind(harness: Harness, request: TunnelRequest) {
    let record = provisioned(&harness, &request).await;

    harness
        .teardown()
        .delete(&teardown_request(&record.id))
        .await
        .unwrap_or_else(|err| panic!("teardown should succeed: {err}"));

    assert!(harness.store.records().is_empty());
    assert!(harness.control_plane.tunnels().is_empty());
    assert!(harness.control_plane.dns_records().is_empty());
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreated, AuditKind::TunnelDeleted]
    );
    assert!(harness.ledger_mentions("[Tunnel Deletion] Deleted DNS record dns-2"));
}

#[rstest]
#[tokio::test]
async fn teardown_removes_remote_files_before_external_resources(
    harness: Harness,
    request: TunnelRequest,
) {
    let record = provisioned(&harness, &request).await;
    let provisioning_commands = harness.executor.commands().len();

    harness
        .teardown()
        .delete(&teardown_request(&record.id))
        .await
        .unwrap_or_else(|err| panic!("teardown should succeed: {err}"));

    let service = format!("vorota-{}.service", record.id);
    let dir = format!("/etc/vorota/{}", record.id);
    let commands = harness.executor.commands();
    assert_eq!(
        commands.get(provisioning_commands..).unwrap_or_default(),
        [
            format!("systemctl stop {service}"),
            format!("systemctl disable {service}"),
            format!("rm -f /etc/systemd/system/{service}"),
            format!("rm -f {dir}/config.yml"),
            format!("rm -f {dir}/credentials.json"),
            format!("rmdir {dir}"),
            String::from("systemctl daemon-reload"),
        ]
    );
    assert!(
        harness.ledger_position("Completed: reload systemd")
            < harness.ledger_position("Deleted tunnel tun-1")
    );
    assert!(
        harness.ledger_position("Deleted tunnel tun-1")
            < harness.ledger_position("Deleted DNS record dns-2")
    );
}

#[rstest]
#[tokio::test]
async fn broken_remote_host_does_not_block_teardown(harness: Harness, request: TunnelRequest) {
    let record = provisioned(&harness, &request).await;
    harness.executor.unreachable_when_contains("systemctl");
    harness
        .executor
        .fail_when_contains("rm -f", 1, "rm: cannot remove: Read-only file system");

    harness
        .teardown()
        .delete(&teardown_request(&record.id))
        .await
        .unwrap_or_else(|err| panic!("teardown should tolerate remote failures: {err}"));

    assert!(harness.store.records().is_empty());
    assert!(harness.control_plane.tunnels().is_empty());
    assert!(harness.ledger_mentions("Warning: could not stop"));
    assert!(harness.ledger_mentions("Read-only file system"));
}

#[rstest]
#[tokio::test]
async fn foreign_or_missing_records_are_not_found(harness: Harness) {
    let mut foreign = sample_record("rec-foreign", TunnelStatus::Active);
    foreign.owner_id = String::from("someone-else");
    harness.store.seed(foreign);

    for record_id in ["rec-foreign", "rec-missing"] {
        let err = harness
            .teardown()
            .delete(&teardown_request(record_id))
            .await
            .err()
            .unwrap_or_else(|| panic!("{record_id} should not be deletable by {OWNER_ID}"));
        assert!(
            matches!(err, TunnelError::NotFound(ref id) if id == record_id),
            "unexpected error: {err}"
        );
    }

    assert_eq!(harness.store.records().len(), 1);
    assert!(harness.executor.commands().is_empty());
    assert!(harness.store.audit_kinds(SERVER_ID).is_empty());
}

#[rstest]
#[case::other_server(|r: &mut TeardownRequest| {
    r.server_id = String::from("srv-2");
    r.server.host = String::from("198.51.100.99");
}, "server")]
#[case::other_domain(|r: &mut TeardownRequest| {
    r.domain_credential_id = String::from("dom-2");
    r.domain.account_id = String::from("someone-elses-account");
}, "domain credential")]
#[tokio::test]
async fn credentials_for_another_target_are_refused(
    harness: Harness,
    request: TunnelRequest,
    #[case] retarget: fn(&mut TeardownRequest),
    #[case] expected_kind: &str,
) {
    let record = provisioned(&harness, &request).await;
    let provisioning_commands = harness.executor.commands().len();
    let mut mismatched = teardown_request(&record.id);
    retarget(&mut mismatched);

    let err = harness
        .teardown()
        .delete(&mismatched)
        .await
        .err()
        .unwrap_or_else(|| panic!("mismatched credentials should be refused"));

    assert!(
        matches!(err, TunnelError::CredentialMismatch { kind, .. } if kind == expected_kind),
        "unexpected error: {err}"
    );
    assert_eq!(harness.executor.commands().len(), provisioning_commands);
    assert_eq!(harness.control_plane.tunnels(), ["tun-1"]);
    assert_eq!(harness.control_plane.dns_records(), ["dns-2"]);
    assert!(harness.store.record(&record.id).is_some());
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreated]
    );
}

#[rstest]
#[tokio::test]
async fn tunnel_delete_failure_keeps_record_for_retry(harness: Harness, request: TunnelRequest) {
    let record = provisioned(&harness, &request).await;
    harness.control_plane.fail_delete_tunnel();

    let err = harness
        .teardown()
        .delete(&teardown_request(&record.id))
        .await
        .err()
        .unwrap_or_else(|| panic!("tunnel delete failure should be fatal"));

    let TunnelError::ControlPlane { step, .. } = err else {
        panic!("expected control-plane error, got {err}");
    };
    assert_eq!(step.label(), "delete tunnel");
    assert!(harness.store.record(&record.id).is_some());
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreated, AuditKind::TunnelDeleteFailed]
    );
}

#[rstest]
#[tokio::test]
async fn missing_dns_record_id_is_skipped(harness: Harness) {
    let mut record = sample_record("rec-partial", TunnelStatus::Failed);
    record.tunnel_id = Some(String::from("tun-legacy"));
    harness.store.seed(record);

    harness
        .teardown()
        .delete(&teardown_request("rec-partial"))
        .await
        .unwrap_or_else(|err| panic!("teardown should succeed: {err}"));

    let calls = harness.control_plane.calls();
    assert_eq!(calls, ["delete_tunnel tun-legacy"]);
    assert!(harness.ledger_mentions("skipping DNS deletion"));
    assert!(harness.store.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_provisioning_can_be_torn_down(harness: Harness, request: TunnelRequest) {
    harness.control_plane.fail_create_dns();
    harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("provisioning should fail"));
    let failed = harness
        .store
        .records()
        .pop()
        .unwrap_or_else(|| panic!("failed record should be kept"));
    assert_eq!(failed.status, TunnelStatus::Failed);

    harness
        .teardown()
        .delete(&teardown_request(&failed.id))
        .await
        .unwrap_or_else(|err| panic!("failed record should be removable: {err}"));

    assert!(harness.store.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn stuck_provisioning_record_can_be_torn_down(harness: Harness) {
    let mut stuck = sample_record("rec-stuck", TunnelStatus::Provisioning);
    stuck.tunnel_id = Some(String::from("tun-orphan"));
    harness.store.seed(stuck);

    harness
        .teardown()
        .delete(&teardown_request("rec-stuck"))
        .await
        .unwrap_or_else(|err| panic!("stuck record should be removable: {err}"));

    assert_eq!(harness.control_plane.calls(), ["delete_tunnel tun-orphan"]);
    assert!(harness.store.records().is_empty());
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelDeleted]
    );
}

#[rstest]
#[tokio::test]
async fn record_delete_failure_is_reported(harness: Harness, request: TunnelRequest) {
    let record = provisioned(&harness, &request).await;
    harness.store.fail_delete();

    let err = harness
        .teardown()
        .delete(&teardown_request(&record.id))
        .await
        .err()
        .unwrap_or_else(|| panic!("store failure should be fatal"));

    assert!(matches!(err, TunnelError::Persistence { .. }));
    assert!(harness.store.record(&record.id).is_some());
}
