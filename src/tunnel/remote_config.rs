//! Remote file layout and rendering for the tunnel client service.
//!
//! Each tunnel record owns a directory `<root>/<record-id>/` holding
//! `config.yml` and `credentials.json`, plus a systemd unit
//! `vorota-<record-id>.service`.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use shell_escape::unix::escape;

/// Permission bits for the credentials file.
pub const CREDENTIALS_MODE: u32 = 0o600;
/// Permission bits for the config and unit files.
pub const CONFIG_MODE: u32 = 0o644;

/// Where tunnel service files live on remote hosts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteLayout {
    /// Parent directory of per-tunnel directories.
    pub root: Utf8PathBuf,
    /// Directory holding systemd units.
    pub systemd_dir: Utf8PathBuf,
    /// Absolute path of the tunnel client binary.
    pub cloudflared_bin: Utf8PathBuf,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("/etc/vorota"),
            systemd_dir: Utf8PathBuf::from("/etc/systemd/system"),
            cloudflared_bin: Utf8PathBuf::from("/usr/local/bin/cloudflared"),
        }
    }
}

/// Paths belonging to one tunnel record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunnelFiles {
    /// Per-tunnel directory.
    pub dir: Utf8PathBuf,
    /// Tunnel client configuration.
    pub config: Utf8PathBuf,
    /// Tunnel credentials.
    pub credentials: Utf8PathBuf,
    /// systemd unit name.
    pub unit_name: String,
    /// systemd unit path.
    pub unit: Utf8PathBuf,
}

impl TunnelFiles {
    /// Resolves the paths for `record_id` under `layout`.
    #[must_use]
    pub fn new(layout: &RemoteLayout, record_id: &str) -> Self {
        let dir = layout.root.join(record_id);
        let unit_name = format!("vorota-{record_id}.service");
        Self {
            config: dir.join("config.yml"),
            credentials: dir.join("credentials.json"),
            unit: layout.systemd_dir.join(&unit_name),
            unit_name,
            dir,
        }
    }

    /// Files removed on teardown, service definition first.
    #[must_use]
    pub fn removable(&self) -> [&Utf8Path; 3] {
        [
            self.unit.as_path(),
            self.config.as_path(),
            self.credentials.as_path(),
        ]
    }

    /// Reloads unit definitions, then enables and starts the service.
    #[must_use]
    pub fn activate_command(&self) -> String {
        let unit = quote(&self.unit_name);
        format!("systemctl daemon-reload && systemctl enable {unit} && systemctl start {unit}")
    }

    /// Prints `active` when the service is running.
    #[must_use]
    pub fn is_active_command(&self) -> String {
        format!("systemctl is-active {}", quote(&self.unit_name))
    }

    /// Stops the service.
    #[must_use]
    pub fn stop_command(&self) -> String {
        format!("systemctl stop {}", quote(&self.unit_name))
    }

    /// Disables the service.
    #[must_use]
    pub fn disable_command(&self) -> String {
        format!("systemctl disable {}", quote(&self.unit_name))
    }

    /// Removes the per-tunnel directory once its files are gone.
    #[must_use]
    pub fn remove_dir_command(&self) -> String {
        format!("rmdir {}", quote(self.dir.as_str()))
    }

    /// Removes everything this record installed, ignoring individual
    /// failures, and reloads unit definitions.
    #[must_use]
    pub fn cleanup_command(&self) -> String {
        let files = self
            .removable()
            .iter()
            .map(|path| quote(path.as_str()))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{}; {}; rm -f {files}; {}; {}",
            self.stop_command(),
            self.disable_command(),
            self.remove_dir_command(),
            DAEMON_RELOAD
        )
    }
}

/// Reloads systemd unit definitions.
pub const DAEMON_RELOAD: &str = "systemctl daemon-reload";

/// Removes a single file if present.
#[must_use]
pub fn remove_file_command(path: &Utf8Path) -> String {
    format!("rm -f {}", quote(path.as_str()))
}

fn quote(value: &str) -> String {
    escape(value.into()).into_owned()
}

/// Renders the tunnel client configuration routing `hostname` to the
/// published host port, with a 404 fallback.
#[must_use]
pub fn render_config(tunnel_id: &str, files: &TunnelFiles, hostname: &str, host_port: u16) -> String {
    format!(
        concat!(
            "tunnel: {tunnel_id}\n",
            "credentials-file: {credentials}\n",
            "ingress:\n",
            "  - hostname: {hostname}\n",
            "    service: http://localhost:{host_port}\n",
            "  - service: http_status:404\n"
        ),
        tunnel_id = tunnel_id,
        credentials = files.credentials,
        hostname = hostname,
        host_port = host_port,
    )
}

/// Renders the credentials file read by the tunnel client.
#[must_use]
pub fn render_credentials(account_id: &str, tunnel_id: &str, secret: &str) -> String {
    json!({
        "AccountTag": account_id,
        "TunnelID": tunnel_id,
        "TunnelSecret": secret,
    })
    .to_string()
}

/// Renders the systemd unit supervising the tunnel client.
#[must_use]
pub fn render_unit(layout: &RemoteLayout, files: &TunnelFiles, hostname: &str) -> String {
    format!(
        concat!(
            "[Unit]\n",
            "Description=vorota tunnel for {hostname}\n",
            "After=network-online.target\n",
            "Wants=network-online.target\n",
            "\n",
            "[Service]\n",
            "Type=simple\n",
            "ExecStart={bin} --no-autoupdate --config {config} tunnel run\n",
            "Restart=on-failure\n",
            "RestartSec=5s\n",
            "\n",
            "[Install]\n",
            "WantedBy=multi-user.target\n"
        ),
        hostname = hostname,
        bin = layout.cloudflared_bin,
        config = files.config,
    )
}
