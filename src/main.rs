//! Binary entry point for the Vorota CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::debug;

use vorota::{
    AuditEvent, ConfigError, ControlPlaneClient, ControlPlaneError, CredentialBundle,
    CredentialsError, DomainCredential, LedgerStore, LoggingError, SeaOrmStore, ServerCredential,
    SshExecutor, StoreError, TeardownRequest, TeardownSaga, TunnelError, TunnelRecord,
    TunnelRequest, TunnelSaga, TunnelStore, VorotaConfig, logging,
};

mod cli;

use cli::{Cli, CredentialArgs, ExposeCommand, LedgerCommand, StatusCommand, TeardownCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("control-plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = VorotaConfig::load_without_cli_args()?;
    config.validate()?;
    logging::init(&config.log_filter, config.parsed_log_format()?)?;
    debug!(database = %config.database_url, api = %config.api_base, "configuration loaded");

    let store = SeaOrmStore::connect(&config.database_url).await?;
    match cli {
        Cli::Expose(command) => expose(&config, store, command).await,
        Cli::Teardown(command) => teardown(&config, store, command).await,
        Cli::Status(command) => status(&config, &store, &command).await,
        Cli::Ledger(command) => ledger(&store, &command).await,
    }
}

struct Selected {
    server: ServerCredential,
    domain: DomainCredential,
}

fn select(args: &CredentialArgs) -> Result<Selected, CliError> {
    select_from(&args.credentials, &args.server, &args.domain)
}

fn select_from(path: &str, server_id: &str, domain_ref: &str) -> Result<Selected, CliError> {
    let bundle = CredentialBundle::load(Utf8Path::new(path))?;
    Ok(Selected {
        server: bundle.server(server_id)?.clone(),
        domain: bundle.domain(domain_ref)?.clone(),
    })
}

async fn expose(
    config: &VorotaConfig,
    store: SeaOrmStore,
    command: ExposeCommand,
) -> Result<(), CliError> {
    let Selected { server, domain } = select(&command.credentials)?;
    let client = ControlPlaneClient::new(&config.client_settings())?;
    let saga = TunnelSaga::new(
        client,
        SshExecutor::new(config.ssh_settings()),
        store,
        config.remote_layout(),
    )
    .with_step_timeout(config.step_timeout());

    let request = TunnelRequest {
        owner_id: command.owner,
        server_id: command.credentials.server,
        container_id: command.container,
        domain_credential_id: command.credentials.domain,
        container_port: command.container_port,
        host_port: command.host_port,
        subdomain: command.subdomain,
        server,
        domain,
    };
    let record = saga.create(&request).await?;
    writeln!(io::stdout(), "{}", render_record(&record)).ok();
    writeln!(io::stdout(), "https://{}", record.full_domain).ok();
    Ok(())
}

async fn teardown(
    config: &VorotaConfig,
    store: SeaOrmStore,
    command: TeardownCommand,
) -> Result<(), CliError> {
    let record = store
        .find(&command.record_id)
        .await?
        .filter(|record| record.owner_id == command.owner)
        .ok_or_else(|| TunnelError::NotFound(command.record_id.clone()))?;
    let Selected { server, domain } = select_from(
        &command.credentials,
        &record.server_id,
        &record.domain_credential_id,
    )?;
    let client = ControlPlaneClient::new(&config.client_settings())?;
    let saga = TeardownSaga::new(
        client,
        SshExecutor::new(config.ssh_settings()),
        store,
        config.remote_layout(),
    )
    .with_step_timeout(config.step_timeout());

    let request = TeardownRequest {
        record_id: command.record_id,
        owner_id: command.owner,
        server_id: record.server_id,
        domain_credential_id: record.domain_credential_id,
        server,
        domain,
    };
    saga.delete(&request).await?;
    writeln!(io::stdout(), "deleted {}", request.record_id).ok();
    Ok(())
}

async fn status(
    config: &VorotaConfig,
    store: &SeaOrmStore,
    command: &StatusCommand,
) -> Result<(), CliError> {
    let records = store.list_for_server(&command.server).await?;
    let mut stdout = io::stdout();
    if records.is_empty() {
        writeln!(stdout, "no tunnels on server {}", command.server).ok();
    }
    for record in &records {
        writeln!(stdout, "{}", render_record(record)).ok();
    }

    if command.check_token
        && let (Some(path), Some(reference)) = (&command.credentials, &command.domain)
    {
        let bundle = CredentialBundle::load(Utf8Path::new(path))?;
        let domain = bundle.domain(reference)?;
        let client = ControlPlaneClient::new(&config.client_settings())?;
        let token_status = client.verify_token(domain).await?;
        writeln!(stdout, "token for {reference}: {token_status}").ok();
    }
    Ok(())
}

async fn ledger(store: &SeaOrmStore, command: &LedgerCommand) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    for entry in store.read_log(&command.resource).await? {
        write!(stdout, "{}", entry.chunk).ok();
    }
    if command.audit {
        for event in store.audit_events(&command.resource).await? {
            writeln!(stdout, "{}", render_audit(&event)).ok();
        }
    }
    Ok(())
}

fn render_record(record: &TunnelRecord) -> String {
    let mut line = format!(
        "{}\t{}\t{}\t{}:{}\t{}",
        record.id,
        record.status,
        record.full_domain,
        record.container_id,
        record.container_port,
        record.tunnel_id.as_deref().unwrap_or("-"),
    );
    if let Some(message) = &record.error_message {
        line.push('\t');
        line.push_str(message);
    }
    line
}

fn render_audit(event: &AuditEvent) -> String {
    format!(
        "{} {} {}",
        event.created_at.to_rfc3339(),
        event.event.kind,
        event.event.description
    )
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
