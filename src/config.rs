//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::control_plane::ClientSettings;
use crate::logging::LogFormat;
use crate::remote::SshSettings;
use crate::tunnel::RemoteLayout;

/// Default base URL of the tunnel control-plane API.
pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Runtime settings for `vorota`, merged from defaults, configuration files,
/// and `VOROTA_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VOROTA",
    discovery(
        app_name = "vorota",
        env_var = "VOROTA_CONFIG_PATH",
        config_file_name = "vorota.toml",
        dotfile_name = ".vorota.toml",
        project_file_name = "vorota.toml"
    )
)]
pub struct VorotaConfig {
    /// Connection string for the tunnel metadata store.
    #[ortho_config(default = "sqlite://vorota.db?mode=rwc".to_owned())]
    pub database_url: String,
    /// Base URL of the control-plane REST API.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_base: String,
    /// Per-request timeout for control-plane calls, in seconds.
    #[ortho_config(default = 30)]
    pub request_timeout_secs: u64,
    /// SSH connection and authentication timeout, in seconds.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// Upper bound for a single remote command, in seconds.
    #[ortho_config(default = 60)]
    pub ssh_command_timeout_secs: u64,
    /// Upper bound for each provisioning step, in seconds.
    #[ortho_config(default = 120)]
    pub step_timeout_secs: u64,
    /// Remote directory holding per-tunnel configuration.
    #[ortho_config(default = "/etc/vorota".to_owned())]
    pub remote_root: String,
    /// Remote directory holding systemd unit files.
    #[ortho_config(default = "/etc/systemd/system".to_owned())]
    pub systemd_dir: String,
    /// Absolute path of the tunnel client binary on the remote host.
    #[ortho_config(default = "/usr/local/bin/cloudflared".to_owned())]
    pub cloudflared_bin: String,
    /// Log filter used when `RUST_LOG` is not set.
    #[ortho_config(default = "info".to_owned())]
    pub log_filter: String,
    /// Log output format: `text` or `json`.
    #[ortho_config(default = "text".to_owned())]
    pub log_format: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to vorota.toml",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::InvalidValue(format!(
            "invalid {}: {reason}; check {} or {} in vorota.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const DATABASE_URL: FieldMetadata =
    FieldMetadata::new("database URL", "VOROTA_DATABASE_URL", "database_url");
const API_BASE: FieldMetadata =
    FieldMetadata::new("control-plane API base URL", "VOROTA_API_BASE", "api_base");
const REQUEST_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "request timeout",
    "VOROTA_REQUEST_TIMEOUT_SECS",
    "request_timeout_secs",
);
const SSH_CONNECT_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "SSH connect timeout",
    "VOROTA_SSH_CONNECT_TIMEOUT_SECS",
    "ssh_connect_timeout_secs",
);
const SSH_COMMAND_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "SSH command timeout",
    "VOROTA_SSH_COMMAND_TIMEOUT_SECS",
    "ssh_command_timeout_secs",
);
const STEP_TIMEOUT: FieldMetadata = FieldMetadata::new(
    "provisioning step timeout",
    "VOROTA_STEP_TIMEOUT_SECS",
    "step_timeout_secs",
);
const REMOTE_ROOT: FieldMetadata =
    FieldMetadata::new("remote configuration root", "VOROTA_REMOTE_ROOT", "remote_root");
const SYSTEMD_DIR: FieldMetadata =
    FieldMetadata::new("systemd unit directory", "VOROTA_SYSTEMD_DIR", "systemd_dir");
const CLOUDFLARED_BIN: FieldMetadata = FieldMetadata::new(
    "tunnel client binary path",
    "VOROTA_CLOUDFLARED_BIN",
    "cloudflared_bin",
);
const LOG_FORMAT: FieldMetadata = FieldMetadata::new("log format", "VOROTA_LOG_FORMAT", "log_format");

impl VorotaConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("vorota")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::InvalidValue`] when a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.database_url, &DATABASE_URL)?;
        require(&self.api_base, &API_BASE)?;
        if !(self.api_base.starts_with("https://") || self.api_base.starts_with("http://")) {
            return Err(API_BASE.invalid("expected an http(s) URL"));
        }
        require_positive(self.request_timeout_secs, &REQUEST_TIMEOUT)?;
        require_positive(self.ssh_connect_timeout_secs, &SSH_CONNECT_TIMEOUT)?;
        require_positive(self.ssh_command_timeout_secs, &SSH_COMMAND_TIMEOUT)?;
        require_positive(self.step_timeout_secs, &STEP_TIMEOUT)?;
        require_absolute(&self.remote_root, &REMOTE_ROOT)?;
        require_absolute(&self.systemd_dir, &SYSTEMD_DIR)?;
        require_absolute(&self.cloudflared_bin, &CLOUDFLARED_BIN)?;
        self.parsed_log_format()?;
        Ok(())
    }

    /// Log output format named by `log_format`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for anything but `text` or
    /// `json`.
    pub fn parsed_log_format(&self) -> Result<LogFormat, ConfigError> {
        self.log_format
            .parse::<LogFormat>()
            .map_err(|err| LOG_FORMAT.invalid(&err))
    }

    /// Settings for the control-plane HTTP client.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            api_base: self.api_base.trim_end_matches('/').to_owned(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Settings for the SSH executor.
    #[must_use]
    pub const fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout_secs),
            command_timeout: Duration::from_secs(self.ssh_command_timeout_secs),
        }
    }

    /// Remote file layout for tunnel services.
    #[must_use]
    pub fn remote_layout(&self) -> RemoteLayout {
        RemoteLayout {
            root: Utf8PathBuf::from(&self.remote_root),
            systemd_dir: Utf8PathBuf::from(&self.systemd_dir),
            cloudflared_bin: Utf8PathBuf::from(&self.cloudflared_bin),
        }
    }

    /// Upper bound applied to each provisioning step.
    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

fn require(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(metadata.invalid("must be greater than zero"));
    }
    Ok(())
}

fn require_absolute(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    require(value, metadata)?;
    if !value.starts_with('/') {
        return Err(metadata.invalid("must be an absolute path"));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
