//! Command-line interface definitions for the `vorota` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `vorota` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vorota",
    about = "Expose container ports through managed tunnels",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a tunnel, DNS record and remote tunnel service for a container port.
    #[command(name = "expose", about = "Expose a container port through a new tunnel")]
    Expose(ExposeCommand),
    /// Remove a tunnel and everything it created.
    #[command(name = "teardown", about = "Remove a tunnel and its DNS record")]
    Teardown(TeardownCommand),
    /// List tunnel records for a server.
    #[command(name = "status", about = "List tunnel records for a server")]
    Status(StatusCommand),
    /// Print the provisioning log for a resource.
    #[command(name = "ledger", about = "Print the provisioning log for a server")]
    Ledger(LedgerCommand),
}

/// Credential selection shared by commands that talk to external systems.
#[derive(Debug, Args)]
pub(crate) struct CredentialArgs {
    /// JSON credential bundle with `servers` and `domains` maps.
    #[arg(long, value_name = "PATH", env = "VOROTA_CREDENTIALS")]
    pub(crate) credentials: String,
    /// Server identifier in the credential bundle.
    #[arg(long, value_name = "ID")]
    pub(crate) server: String,
    /// Domain credential reference in the credential bundle.
    #[arg(long, value_name = "REF")]
    pub(crate) domain: String,
}

/// Arguments for the `vorota expose` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExposeCommand {
    /// Credential bundle and selections.
    #[command(flatten)]
    pub(crate) credentials: CredentialArgs,
    /// Owner recorded on the tunnel and its audit events.
    #[arg(long, value_name = "ID")]
    pub(crate) owner: String,
    /// Container to expose.
    #[arg(long, value_name = "ID")]
    pub(crate) container: String,
    /// Port the service listens on inside the container.
    #[arg(long, value_name = "PORT")]
    pub(crate) container_port: u16,
    /// Port the container port is published on at the host.
    #[arg(long, value_name = "PORT")]
    pub(crate) host_port: u16,
    /// Subdomain label to use; a random 15-character label is generated
    /// when omitted.
    #[arg(long, value_name = "LABEL")]
    pub(crate) subdomain: Option<String>,
}

/// Arguments for the `vorota teardown` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct TeardownCommand {
    /// JSON credential bundle; the server and domain entries are looked up
    /// by the references stored on the record.
    #[arg(long, value_name = "PATH", env = "VOROTA_CREDENTIALS")]
    pub(crate) credentials: String,
    /// Owner of the tunnel record.
    #[arg(long, value_name = "ID")]
    pub(crate) owner: String,
    /// Tunnel record to remove.
    #[arg(value_name = "RECORD_ID")]
    pub(crate) record_id: String,
}

/// Arguments for the `vorota status` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    /// Server whose tunnel records are listed.
    #[arg(long, value_name = "ID")]
    pub(crate) server: String,
    /// Also verify the API token of a domain credential.
    #[arg(long, requires_all = ["credentials", "domain"])]
    pub(crate) check_token: bool,
    /// JSON credential bundle used with `--check-token`.
    #[arg(long, value_name = "PATH", env = "VOROTA_CREDENTIALS")]
    pub(crate) credentials: Option<String>,
    /// Domain credential reference used with `--check-token`.
    #[arg(long, value_name = "REF")]
    pub(crate) domain: Option<String>,
}

/// Arguments for the `vorota ledger` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct LedgerCommand {
    /// Resource (server) whose provisioning log is printed.
    #[arg(long, value_name = "ID")]
    pub(crate) resource: String,
    /// Also print audit events for the resource.
    #[arg(long)]
    pub(crate) audit: bool,
}
