//! Remote command execution and file transfer.
//!
//! [`RemoteExecutor`] is the seam between the sagas and a remote host.
//! Commands report their exit status instead of failing on non-zero exits;
//! only transport problems surface as [`RemoteError`]. File writes travel as
//! base64 inside a quoted heredoc so arbitrary bytes survive the shell.

use std::future::Future;
use std::pin::Pin;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8Path;
use shell_escape::unix::escape;
use thiserror::Error;

use crate::credentials::ServerCredential;

mod ssh;

pub use ssh::{SshExecutor, SshSettings};

/// Heredoc delimiter used for file payloads. Base64 output never contains it.
const HEREDOC_MARKER: &str = "__VOROTA_EOF__";
/// Line width for base64 payloads.
const BASE64_LINE_WIDTH: usize = 76;
/// Default permission bits for written files.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Boxed future returned by [`RemoteExecutor`] operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Captured output of a remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteOutput {
    /// Exit code reported by the remote shell, if any.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Short description of a failed run for error messages.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        match self.exit_code {
            Some(code) if stderr.is_empty() => format!("exited with status {code}"),
            Some(code) => format!("exited with status {code}: {stderr}"),
            None if stderr.is_empty() => String::from("terminated without an exit status"),
            None => format!("terminated without an exit status: {stderr}"),
        }
    }
}

/// Errors raised while talking to a remote host.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The credential could not be used, for example an undecodable key.
    #[error("invalid credential for {host}: {message}")]
    InvalidCredential {
        /// Target host.
        host: String,
        /// Human-readable error message.
        message: String,
    },
    /// The SSH connection could not be established.
    #[error("failed to connect to {host}: {message}")]
    Connect {
        /// Target host.
        host: String,
        /// Human-readable error message.
        message: String,
    },
    /// The host rejected the supplied credential.
    #[error("authentication as {user} on {host} was rejected")]
    Authentication {
        /// Login user.
        user: String,
        /// Target host.
        host: String,
    },
    /// A session channel failed while running a command.
    #[error("channel error on {host}: {message}")]
    Channel {
        /// Target host.
        host: String,
        /// Human-readable error message.
        message: String,
    },
    /// The operation exceeded its timeout.
    #[error("{operation} on {host} timed out")]
    Timeout {
        /// Target host.
        host: String,
        /// Operation that timed out.
        operation: &'static str,
    },
    /// A command that must succeed exited unsuccessfully.
    #[error("{action} failed: {summary}")]
    CommandFailure {
        /// Description of the attempted action.
        action: String,
        /// Exit status and stderr summary.
        summary: String,
    },
}

/// Executes commands and writes files on remote hosts.
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` through the remote shell and captures its output.
    ///
    /// A non-zero exit is reported in [`RemoteOutput::exit_code`], not as an
    /// error.
    fn exec<'a>(
        &'a self,
        credential: &'a ServerCredential,
        command: &'a str,
    ) -> RemoteFuture<'a, RemoteOutput>;

    /// Writes `content` to `path`, creating the parent directory and
    /// applying `mode` (defaulting to [`DEFAULT_FILE_MODE`]).
    fn write_file<'a>(
        &'a self,
        credential: &'a ServerCredential,
        path: &'a Utf8Path,
        content: &'a [u8],
        mode: Option<u32>,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let command = write_file_command(path, content, mode.unwrap_or(DEFAULT_FILE_MODE));
            let output = self.exec(credential, &command).await?;
            if output.is_success() {
                return Ok(());
            }
            Err(RemoteError::CommandFailure {
                action: format!("writing {path}"),
                summary: output.failure_summary(),
            })
        })
    }
}

/// Renders the shell command that decodes a base64 heredoc into `path`.
#[must_use]
pub fn write_file_command(path: &Utf8Path, content: &[u8], mode: u32) -> String {
    let target = escape(path.as_str().into());
    let mut command = String::new();
    if let Some(parent) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
        command.push_str(&format!("mkdir -p {} && ", escape(parent.as_str().into())));
    }
    command.push_str(&format!(
        "(umask 077 && base64 -d > {target}) <<'{HEREDOC_MARKER}' && chmod {mode:o} {target}\n"
    ));
    command.push_str(&wrap_base64(&STANDARD.encode(content)));
    command.push_str(HEREDOC_MARKER);
    command.push('\n');
    command
}

fn wrap_base64(encoded: &str) -> String {
    let mut wrapped = String::with_capacity(encoded.len().saturating_mul(2));
    let mut column = 0;
    for ch in encoded.chars() {
        if column == BASE64_LINE_WIDTH {
            wrapped.push('\n');
            column = 0;
        }
        wrapped.push(ch);
        column += 1;
    }
    if !wrapped.is_empty() {
        wrapped.push('\n');
    }
    wrapped
}
