//! Unit tests for configuration loading and validation.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::*;
use vorota::config::{ConfigError, DEFAULT_API_BASE, VorotaConfig};
use vorota::{LogFormat, RemoteLayout};

#[fixture]
fn valid_config() -> VorotaConfig {
    VorotaConfig {
        database_url: String::from("sqlite::memory:"),
        api_base: String::from(DEFAULT_API_BASE),
        request_timeout_secs: 30,
        ssh_connect_timeout_secs: 10,
        ssh_command_timeout_secs: 60,
        step_timeout_secs: 120,
        remote_root: String::from("/etc/vorota"),
        systemd_dir: String::from("/etc/systemd/system"),
        cloudflared_bin: String::from("/usr/local/bin/cloudflared"),
        log_filter: String::from("info"),
        log_format: String::from("text"),
    }
}

#[rstest]
fn valid_config_passes(valid_config: VorotaConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("config should validate: {err}"));
}

#[rstest]
fn missing_database_url_is_actionable(valid_config: VorotaConfig) {
    let cfg = VorotaConfig {
        database_url: String::from("   "),
        ..valid_config
    };

    let error = cfg
        .validate()
        .err()
        .unwrap_or_else(|| panic!("database URL is required"));
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(
        message.contains("VOROTA_DATABASE_URL"),
        "error should mention env var: {message}"
    );
    assert!(
        message.contains("vorota.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains("database_url"),
        "error should mention TOML key: {message}"
    );
}

/// Every rejected value names the environment variable and TOML key that
/// supplied it.
#[rstest]
#[case::api_scheme(|cfg: &mut VorotaConfig| cfg.api_base = String::from("ftp://example.com"), "VOROTA_API_BASE", "api_base")]
#[case::request_timeout(|cfg: &mut VorotaConfig| cfg.request_timeout_secs = 0, "VOROTA_REQUEST_TIMEOUT_SECS", "request_timeout_secs")]
#[case::ssh_connect(|cfg: &mut VorotaConfig| cfg.ssh_connect_timeout_secs = 0, "VOROTA_SSH_CONNECT_TIMEOUT_SECS", "ssh_connect_timeout_secs")]
#[case::ssh_command(|cfg: &mut VorotaConfig| cfg.ssh_command_timeout_secs = 0, "VOROTA_SSH_COMMAND_TIMEOUT_SECS", "ssh_command_timeout_secs")]
#[case::step_timeout(|cfg: &mut VorotaConfig| cfg.step_timeout_secs = 0, "VOROTA_STEP_TIMEOUT_SECS", "step_timeout_secs")]
#[case::remote_root(|cfg: &mut VorotaConfig| cfg.remote_root = String::from("etc/vorota"), "VOROTA_REMOTE_ROOT", "remote_root")]
#[case::systemd_dir(|cfg: &mut VorotaConfig| cfg.systemd_dir.clear(), "VOROTA_SYSTEMD_DIR", "systemd_dir")]
#[case::cloudflared(|cfg: &mut VorotaConfig| cfg.cloudflared_bin = String::from("cloudflared"), "VOROTA_CLOUDFLARED_BIN", "cloudflared_bin")]
#[case::log_format(|cfg: &mut VorotaConfig| cfg.log_format = String::from("xml"), "VOROTA_LOG_FORMAT", "log_format")]
fn rejected_values_are_actionable(
    mut valid_config: VorotaConfig,
    #[case] mutate: fn(&mut VorotaConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut valid_config);
    let message = valid_config
        .validate()
        .err()
        .unwrap_or_else(|| panic!("validation should fail for {toml_key}"))
        .to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn settings_are_derived_from_fields(valid_config: VorotaConfig) {
    let cfg = VorotaConfig {
        api_base: String::from("https://api.example.test/client/v4/"),
        ..valid_config
    };

    let client = cfg.client_settings();
    assert_eq!(client.api_base, "https://api.example.test/client/v4");
    assert_eq!(client.request_timeout, Duration::from_secs(30));

    let ssh = cfg.ssh_settings();
    assert_eq!(ssh.connect_timeout, Duration::from_secs(10));
    assert_eq!(ssh.command_timeout, Duration::from_secs(60));

    assert_eq!(cfg.step_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.remote_layout(), RemoteLayout::default());
    assert_eq!(
        cfg.remote_layout().root,
        Utf8PathBuf::from("/etc/vorota")
    );
}

#[rstest]
#[case("text", LogFormat::Text)]
#[case(" JSON ", LogFormat::Json)]
fn log_format_is_parsed_case_insensitively(
    valid_config: VorotaConfig,
    #[case] raw: &str,
    #[case] expected: LogFormat,
) {
    let cfg = VorotaConfig {
        log_format: raw.to_owned(),
        ..valid_config
    };
    assert_eq!(cfg.parsed_log_format(), Ok(expected));
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = vorota::test_support::EnvGuard::set_vars(&[
        ("VOROTA_STEP_TIMEOUT_SECS", "45"),
        ("VOROTA_REMOTE_ROOT", "/opt/vorota"),
        ("VOROTA_LOG_FORMAT", "json"),
    ])
    .await;

    let cfg = VorotaConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(cfg.step_timeout(), Duration::from_secs(45));
    assert_eq!(cfg.remote_root, "/opt/vorota");
    assert_eq!(cfg.parsed_log_format(), Ok(LogFormat::Json));
    assert_eq!(cfg.api_base, DEFAULT_API_BASE);
    assert_eq!(cfg.systemd_dir, "/etc/systemd/system");
}
