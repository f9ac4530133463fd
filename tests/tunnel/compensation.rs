//! Failure scenarios: every completed step is compensated in reverse order
//! and the record ends `failed`.

use std::time::Duration;

use rstest::rstest;
use vorota::{
    AuditKind, ControlPlaneError, RemoteOutput, TunnelError, TunnelRecord, TunnelRequest,
    TunnelStatus,
};

use super::test_helpers::{Harness, SERVER_ID, harness, request};

fn only_record(harness: &Harness) -> TunnelRecord {
    let records = harness.store.records();
    assert_eq!(records.len(), 1, "expected exactly one record: {records:?}");
    records
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("record should exist"))
}

#[rstest]
#[tokio::test]
async fn invalid_zone_deletes_tunnel_and_marks_failed(harness: Harness, request: TunnelRequest) {
    harness.control_plane.fail_create_dns();

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("DNS failure should fail provisioning"));

    let TunnelError::ControlPlane { step, ref source } = err else {
        panic!("expected control-plane error, got {err}");
    };
    assert_eq!(step.label(), "create DNS record");
    assert!(
        matches!(source, ControlPlaneError::Api { errors, .. }
            if errors.iter().any(|entry| entry.code == Some(1003))),
        "unexpected source: {source}"
    );

    assert!(harness.control_plane.tunnels().is_empty());
    assert!(harness.control_plane.dns_records().is_empty());
    assert!(
        harness
            .control_plane
            .calls()
            .contains(&String::from("delete_tunnel tun-1"))
    );
    assert!(
        harness.executor.commands().is_empty(),
        "remote host must not be touched"
    );

    let record = only_record(&harness);
    assert_eq!(record.status, TunnelStatus::Failed);
    assert_eq!(record.tunnel_id.as_deref(), Some("tun-1"));
    assert!(record.dns_record_id.is_none());
    let message = record
        .error_message
        .unwrap_or_else(|| panic!("failed record should carry the error"));
    assert!(message.contains("Invalid zone"), "message: {message}");

    let audits = harness.store.audit_log(SERVER_ID);
    assert_eq!(audits.len(), 1);
    let audit = audits
        .first()
        .unwrap_or_else(|| panic!("failure should be audited"));
    assert_eq!(audit.kind, AuditKind::TunnelCreateFailed);
    assert!(audit.description.contains("Invalid zone"));
}

#[rstest]
#[tokio::test]
async fn verification_failure_unwinds_in_reverse_order(harness: Harness, request: TunnelRequest) {
    harness.executor.respond_when_contains(
        "systemctl is-active",
        RemoteOutput {
            exit_code: Some(3),
            stdout: String::from("failed\n"),
            stderr: String::new(),
        },
    );

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("inactive service should fail provisioning"));

    assert!(
        matches!(err, TunnelError::RemoteExecution { ref message, .. } if message.ends_with("is failed")),
        "unexpected error: {err}"
    );

    let calls = harness.control_plane.calls();
    assert_eq!(
        calls.get(2..).unwrap_or_default(),
        ["delete_dns_record dns-2", "delete_tunnel tun-1"]
    );
    let last_command = harness
        .executor
        .commands()
        .pop()
        .unwrap_or_else(|| panic!("cleanup should run remotely"));
    assert!(last_command.starts_with("systemctl stop vorota-"));

    assert!(
        harness.ledger_position("Compensating: remove remote configuration")
            < harness.ledger_position("Compensating: delete DNS record dns-2")
    );
    assert!(
        harness.ledger_position("Compensating: delete DNS record dns-2")
            < harness.ledger_position("Compensating: delete tunnel tun-1")
    );
    assert_eq!(only_record(&harness).status, TunnelStatus::Failed);
}

#[rstest]
#[tokio::test]
async fn compensation_failure_keeps_original_error(harness: Harness, request: TunnelRequest) {
    harness.control_plane.fail_create_dns();
    harness.control_plane.fail_delete_tunnel();

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("DNS failure should fail provisioning"));

    assert!(
        err.to_string().contains("Invalid zone"),
        "original error should propagate: {err}"
    );
    assert_eq!(harness.control_plane.tunnels(), ["tun-1"]);
    assert!(harness.ledger_mentions("compensation 'delete tunnel tun-1' failed"));

    let record = only_record(&harness);
    assert_eq!(record.status, TunnelStatus::Failed);
    let audit = harness
        .store
        .audit_log(SERVER_ID)
        .pop()
        .unwrap_or_else(|| panic!("failure should be audited"));
    assert!(
        audit.description.contains("cleanup also failed"),
        "description: {}",
        audit.description
    );
}

#[rstest]
#[tokio::test]
async fn file_write_failure_removes_partial_configuration(
    harness: Harness,
    request: TunnelRequest,
) {
    harness.executor.fail_writes_to("config.yml");

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("write failure should fail provisioning"));

    assert!(matches!(err, TunnelError::RemoteExecution { source: Some(_), .. }));
    assert_eq!(harness.executor.writes().len(), 1);
    assert!(
        harness
            .executor
            .commands()
            .iter()
            .any(|command| command.contains("rm -f"))
    );
    assert!(harness.control_plane.tunnels().is_empty());
    assert!(harness.control_plane.dns_records().is_empty());
    assert_eq!(only_record(&harness).status, TunnelStatus::Failed);
}

#[rstest]
#[tokio::test]
async fn unreachable_host_is_a_remote_failure(harness: Harness, request: TunnelRequest) {
    harness
        .executor
        .unreachable_when_contains("systemctl enable");

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("unreachable host should fail provisioning"));

    let TunnelError::RemoteExecution { step, ref message, .. } = err else {
        panic!("expected remote failure, got {err}");
    };
    assert_eq!(step.label(), "configure remote host");
    assert!(message.contains("connection refused"), "message: {message}");
    assert!(harness.control_plane.tunnels().is_empty());
}

#[rstest]
#[tokio::test]
async fn stalled_step_times_out_and_compensates(harness: Harness, request: TunnelRequest) {
    harness
        .control_plane
        .stall_create_dns(Duration::from_secs(5));

    let err = harness
        .saga_with_timeout(Duration::from_millis(50))
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("stalled DNS call should time out"));

    let TunnelError::Timeout { step, after } = err else {
        panic!("expected timeout, got {err}");
    };
    assert_eq!(step.label(), "create DNS record");
    assert_eq!(after, Duration::from_millis(50));
    assert!(harness.control_plane.tunnels().is_empty());
    assert_eq!(only_record(&harness).status, TunnelStatus::Failed);
}

#[rstest]
#[tokio::test]
async fn hung_status_update_does_not_block_failure_reporting(
    harness: Harness,
    request: TunnelRequest,
) {
    harness.control_plane.fail_create_dns();
    harness
        .store
        .stall_failed_updates(Duration::from_secs(3600));

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness
            .saga_with_timeout(Duration::from_millis(50))
            .create(&request),
    )
    .await
    .unwrap_or_else(|_| panic!("failure bookkeeping should be bounded by the step timeout"));

    let err = outcome
        .err()
        .unwrap_or_else(|| panic!("DNS failure should fail provisioning"));
    assert!(err.to_string().contains("Invalid zone"), "error: {err}");
    assert!(harness.control_plane.tunnels().is_empty());
    assert!(harness.ledger_mentions("Could not mark record"));
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreateFailed]
    );
}

#[rstest]
#[tokio::test]
async fn failed_status_update_is_tolerated(harness: Harness, request: TunnelRequest) {
    harness.control_plane.fail_create_tunnel();
    harness.store.fail_update();

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("tunnel failure should fail provisioning"));

    assert!(matches!(err, TunnelError::ControlPlane { .. }));
    assert!(harness.ledger_mentions("Could not mark record"));
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreateFailed]
    );
}
