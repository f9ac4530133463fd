//! Forward provisioning scenarios.

use rstest::rstest;
use vorota::test_support::sample_record;
use vorota::{AuditKind, TunnelError, TunnelRequest, TunnelStatus};

use super::test_helpers::{Harness, SERVER_ID, harness, is_generated_label, request};

#[rstest]
#[tokio::test]
async fn provisioning_generates_subdomain_and_activates(harness: Harness, request: TunnelRequest) {
    let record = harness
        .saga()
        .create(&request)
        .await
        .unwrap_or_else(|err| panic!("provisioning should succeed: {err}"));

    assert_eq!(record.status, TunnelStatus::Active);
    assert!(
        is_generated_label(&record.subdomain),
        "unexpected subdomain {}",
        record.subdomain
    );
    assert_eq!(
        record.full_domain,
        format!("{}.example.com", record.subdomain)
    );
    assert_eq!(record.tunnel_id.as_deref(), Some("tun-1"));
    assert_eq!(record.dns_record_id.as_deref(), Some("dns-2"));
    assert!(record.error_message.is_none());

    let stored = harness
        .store
        .record(&record.id)
        .unwrap_or_else(|| panic!("record should be stored"));
    assert_eq!(stored.status, TunnelStatus::Active);
    assert_eq!(stored.dns_record_id.as_deref(), Some("dns-2"));
    assert_eq!(stored.tunnel_secret.as_deref(), Some("secret-for-tun-1"));

    assert_eq!(harness.control_plane.tunnels(), ["tun-1"]);
    assert_eq!(harness.control_plane.dns_records(), ["dns-2"]);
    assert_eq!(
        harness.control_plane.calls(),
        [
            String::from("create_tunnel tunnel-3f4e5d6c7b8a"),
            format!("create_dns_record {}", record.full_domain),
        ]
    );
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreated]
    );
}

#[rstest]
#[tokio::test]
async fn provisioning_writes_remote_files_then_verifies(harness: Harness, request: TunnelRequest) {
    let record = harness
        .saga()
        .create(&request)
        .await
        .unwrap_or_else(|err| panic!("provisioning should succeed: {err}"));

    let writes = harness.executor.writes();
    let written: Vec<(&str, Option<u32>)> = writes
        .iter()
        .map(|file| (file.path.as_str(), file.mode))
        .collect();
    let dir = format!("/etc/vorota/{}", record.id);
    let unit = format!("/etc/systemd/system/vorota-{}.service", record.id);
    assert_eq!(
        written,
        [
            (format!("{dir}/credentials.json").as_str(), Some(0o600)),
            (format!("{dir}/config.yml").as_str(), Some(0o644)),
            (unit.as_str(), Some(0o644)),
        ]
    );

    let credentials = writes
        .first()
        .unwrap_or_else(|| panic!("credentials should be written"));
    assert!(credentials.content.contains("\"TunnelSecret\":\"secret-for-tun-1\""));
    let config = writes
        .get(1)
        .unwrap_or_else(|| panic!("config should be written"));
    assert!(config.content.contains(&format!("hostname: {}", record.full_domain)));
    assert!(config.content.contains("service: http://localhost:32768"));

    let service = format!("vorota-{}.service", record.id);
    assert_eq!(
        harness.executor.commands(),
        [
            format!(
                "systemctl daemon-reload && systemctl enable {service} && systemctl start {service}"
            ),
            format!("systemctl is-active {service}"),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn requested_subdomain_is_used_verbatim(harness: Harness, mut request: TunnelRequest) {
    request.subdomain = Some(String::from("grafana"));

    let record = harness
        .saga()
        .create(&request)
        .await
        .unwrap_or_else(|err| panic!("provisioning should succeed: {err}"));

    assert_eq!(record.subdomain, "grafana");
    assert_eq!(record.full_domain, "grafana.example.com");
}

#[rstest]
#[tokio::test]
async fn ledger_records_progress_with_prefix(harness: Harness, request: TunnelRequest) {
    harness
        .saga()
        .create(&request)
        .await
        .unwrap_or_else(|err| panic!("provisioning should succeed: {err}"));

    let lines = harness.ledger_lines();
    assert!(lines.iter().all(|line| line.starts_with("[Tunnel] ")));
    assert!(harness.ledger_position("Creating tunnel") < harness.ledger_position("Created tunnel"));
    assert!(
        harness.ledger_position("Created tunnel") < harness.ledger_position("Created DNS record")
    );
    assert!(harness.ledger_mentions("Tunnel active at https://"));
}

#[rstest]
#[tokio::test]
async fn second_request_for_live_triple_conflicts(harness: Harness, request: TunnelRequest) {
    harness
        .saga()
        .create(&request)
        .await
        .unwrap_or_else(|err| panic!("first provisioning should succeed: {err}"));

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("second provisioning should conflict"));

    assert!(
        matches!(err, TunnelError::Conflict { container_port: 8080, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(harness.control_plane.tunnels().len(), 1);
    assert_eq!(harness.store.records().len(), 1);
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreated]
    );
}

#[rstest]
#[tokio::test]
async fn insert_race_is_reported_as_conflict(harness: Harness, request: TunnelRequest) {
    harness
        .store
        .seed(sample_record("winner", TunnelStatus::Active));
    harness.store.hide_live_records();
    let mut racing = request;
    racing.container_id = String::from("ctr-1");

    let err = harness
        .saga()
        .create(&racing)
        .await
        .err()
        .unwrap_or_else(|| panic!("losing the insert race should conflict"));

    assert!(
        matches!(err, TunnelError::Conflict { container_port: 8080, .. }),
        "unexpected error: {err}"
    );
    assert!(harness.control_plane.calls().is_empty());
    assert!(harness.executor.commands().is_empty());
    assert_eq!(harness.store.records().len(), 1);
    assert!(harness.store.audit_kinds(SERVER_ID).is_empty());
}

#[rstest]
#[tokio::test]
async fn provisioning_record_blocks_the_triple(harness: Harness, request: TunnelRequest) {
    harness
        .store
        .seed(sample_record("in-flight", TunnelStatus::Provisioning));
    let mut clashing = request;
    clashing.container_id = String::from("ctr-1");

    let err = harness
        .saga()
        .create(&clashing)
        .await
        .err()
        .unwrap_or_else(|| panic!("in-flight record should block the triple"));

    assert!(matches!(err, TunnelError::Conflict { .. }));
    assert!(harness.control_plane.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_record_releases_the_triple(harness: Harness, request: TunnelRequest) {
    harness
        .store
        .seed(sample_record("old", TunnelStatus::Failed));
    let mut retry = request;
    retry.container_id = String::from("ctr-1");

    let record = harness
        .saga()
        .create(&retry)
        .await
        .unwrap_or_else(|err| panic!("failed record should not block: {err}"));

    assert_eq!(record.status, TunnelStatus::Active);
    assert_eq!(harness.store.records().len(), 2);
}

#[rstest]
#[case::zero_port(|r: &mut TunnelRequest| r.container_port = 0)]
#[case::bad_subdomain(|r: &mut TunnelRequest| r.subdomain = Some(String::from("-nope")))]
#[case::missing_owner(|r: &mut TunnelRequest| r.owner_id.clear())]
#[tokio::test]
async fn invalid_requests_have_no_side_effects(
    harness: Harness,
    mut request: TunnelRequest,
    #[case] mutate: fn(&mut TunnelRequest),
) {
    mutate(&mut request);

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("request should be rejected"));

    assert!(matches!(err, TunnelError::InvalidRequest(_)));
    assert!(harness.control_plane.calls().is_empty());
    assert!(harness.executor.commands().is_empty());
    assert!(harness.store.records().is_empty());
    assert!(harness.store.log_chunks(SERVER_ID).is_empty());
    assert!(harness.store.audit_kinds(SERVER_ID).is_empty());
}

#[rstest]
#[tokio::test]
async fn insert_failure_stops_before_external_calls(harness: Harness, request: TunnelRequest) {
    harness.store.fail_insert();

    let err = harness
        .saga()
        .create(&request)
        .await
        .err()
        .unwrap_or_else(|| panic!("insert failure should fail provisioning"));

    assert!(matches!(err, TunnelError::Persistence { .. }));
    assert!(harness.control_plane.calls().is_empty());
    assert_eq!(
        harness.store.audit_kinds(SERVER_ID),
        [AuditKind::TunnelCreateFailed]
    );
}

#[rstest]
#[tokio::test]
async fn ledger_outage_does_not_change_the_outcome(harness: Harness, request: TunnelRequest) {
    harness.store.fail_ledger_writes();

    let record = harness
        .saga()
        .create(&request)
        .await
        .unwrap_or_else(|err| panic!("provisioning should succeed without a ledger: {err}"));

    assert_eq!(record.status, TunnelStatus::Active);
    assert!(harness.store.log_chunks(SERVER_ID).is_empty());
}
