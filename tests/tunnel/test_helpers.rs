//! Shared fixtures for tunnel saga scenarios.

use std::time::Duration;

use rstest::fixture;
use vorota::test_support::{
    MemoryStore, ScriptedControlPlane, ScriptedExecutor, sample_domain, sample_server,
};
use vorota::{RemoteLayout, TeardownRequest, TeardownSaga, TunnelRequest, TunnelSaga};

pub const SERVER_ID: &str = "srv-1";
pub const DOMAIN_CREDENTIAL_ID: &str = "dom-1";
pub const OWNER_ID: &str = "owner-1";

pub type Saga = TunnelSaga<ScriptedControlPlane, ScriptedExecutor, MemoryStore>;
pub type Teardown = TeardownSaga<ScriptedControlPlane, ScriptedExecutor, MemoryStore>;

/// Doubles shared between a saga under test and the assertions.
#[derive(Clone, Debug, Default)]
pub struct Harness {
    pub control_plane: ScriptedControlPlane,
    pub executor: ScriptedExecutor,
    pub store: MemoryStore,
}

impl Harness {
    pub fn saga(&self) -> Saga {
        TunnelSaga::new(
            self.control_plane.clone(),
            self.executor.clone(),
            self.store.clone(),
            RemoteLayout::default(),
        )
    }

    pub fn saga_with_timeout(&self, step_timeout: Duration) -> Saga {
        self.saga().with_step_timeout(step_timeout)
    }

    pub fn teardown(&self) -> Teardown {
        TeardownSaga::new(
            self.control_plane.clone(),
            self.executor.clone(),
            self.store.clone(),
            RemoteLayout::default(),
        )
    }

    /// Provisioning log lines for the test server, newlines trimmed.
    pub fn ledger_lines(&self) -> Vec<String> {
        self.store
            .log_chunks(SERVER_ID)
            .into_iter()
            .map(|chunk| chunk.trim_end().to_owned())
            .collect()
    }

    /// Whether any ledger line contains `needle`.
    pub fn ledger_mentions(&self, needle: &str) -> bool {
        self.ledger_lines().iter().any(|line| line.contains(needle))
    }

    /// Position of the first ledger line containing `needle`.
    pub fn ledger_position(&self, needle: &str) -> usize {
        self.ledger_lines()
            .iter()
            .position(|line| line.contains(needle))
            .unwrap_or_else(|| panic!("ledger should mention {needle:?}: {:?}", self.ledger_lines()))
    }
}

#[fixture]
pub fn harness() -> Harness {
    Harness::default()
}

#[fixture]
pub fn request() -> TunnelRequest {
    TunnelRequest {
        owner_id: String::from(OWNER_ID),
        server_id: String::from(SERVER_ID),
        container_id: String::from("3f4e5d6c7b8a9f0e1d2c"),
        domain_credential_id: String::from(DOMAIN_CREDENTIAL_ID),
        container_port: 8080,
        host_port: 32768,
        subdomain: None,
        server: sample_server(),
        domain: sample_domain(),
    }
}

pub fn teardown_request(record_id: &str) -> TeardownRequest {
    TeardownRequest {
        record_id: record_id.to_owned(),
        owner_id: String::from(OWNER_ID),
        server_id: String::from(SERVER_ID),
        domain_credential_id: String::from(DOMAIN_CREDENTIAL_ID),
        server: sample_server(),
        domain: sample_domain(),
    }
}

/// Whether `label` is a generated subdomain: 15 lowercase alphanumerics.
pub fn is_generated_label(label: &str) -> bool {
    label.len() == 15
        && label
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
}
