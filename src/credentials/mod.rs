//! Credential bundles consumed by the provisioning sagas.
//!
//! Collecting and encrypting credentials happens elsewhere; this module only
//! models the resolved values and reads operator bundles from disk.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

/// Number of leading token characters that may appear in logs.
const TOKEN_PREVIEW_CHARS: usize = 6;

/// API credential scoped to a single DNS zone.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct DomainCredential {
    /// Apex domain the zone serves, for example `example.com`.
    pub domain_name: String,
    /// Bearer token for the control-plane API.
    pub api_token: String,
    /// Zone identifier used for DNS record operations.
    pub zone_id: String,
    /// Account identifier owning tunnels.
    pub account_id: String,
}

impl DomainCredential {
    /// Returns a short, log-safe prefix of the API token.
    #[must_use]
    pub fn token_preview(&self) -> String {
        let prefix: String = self.api_token.chars().take(TOKEN_PREVIEW_CHARS).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for DomainCredential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DomainCredential")
            .field("domain_name", &self.domain_name)
            .field("api_token", &self.token_preview())
            .field("zone_id", &self.zone_id)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Secret used to authenticate against a remote host.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "auth", rename_all = "snake_case")]
pub enum ServerSecret {
    /// Password authentication.
    Password {
        /// Login password.
        password: String,
    },
    /// Public-key authentication with a PEM/OpenSSH encoded private key.
    PrivateKey {
        /// Encoded private key material.
        private_key: String,
        /// Passphrase for encrypted keys.
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for ServerSecret {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => formatter.write_str("Password(***)"),
            Self::PrivateKey { .. } => formatter.write_str("PrivateKey(***)"),
        }
    }
}

/// Connection details for a remote host.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServerCredential {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user. The user must be able to manage system services.
    pub username: String,
    /// Authentication secret.
    #[serde(flatten)]
    pub secret: ServerSecret,
}

const fn default_ssh_port() -> u16 {
    22
}

/// Operator-supplied bundle mapping identifiers to resolved credentials.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CredentialBundle {
    /// Server credentials keyed by server identifier.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerCredential>,
    /// Domain credentials keyed by credential reference.
    #[serde(default)]
    pub domains: BTreeMap<String, DomainCredential>,
}

/// Errors raised while loading or querying a credential bundle.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// Raised when the bundle file cannot be read.
    #[error("failed to read credentials from {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the bundle is not valid JSON of the expected shape.
    #[error("failed to parse credentials in {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a server identifier has no credential in the bundle.
    #[error("no server credential for {0}")]
    UnknownServer(String),
    /// Raised when a domain reference has no credential in the bundle.
    #[error("no domain credential for {0}")]
    UnknownDomain(String),
}

impl CredentialBundle {
    /// Reads a JSON credential bundle from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Io`] when the file cannot be read and
    /// [`CredentialsError::Parse`] when its contents are malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, CredentialsError> {
        let contents = read_bundle(path)?;
        Self::parse(path, &contents)
    }

    fn parse(path: &Utf8Path, contents: &str) -> Result<Self, CredentialsError> {
        serde_json::from_str(contents).map_err(|err| CredentialsError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Looks up the credential for a server.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::UnknownServer`] when the id is absent.
    pub fn server(&self, server_id: &str) -> Result<&ServerCredential, CredentialsError> {
        self.servers
            .get(server_id)
            .ok_or_else(|| CredentialsError::UnknownServer(server_id.to_owned()))
    }

    /// Looks up the credential for a domain reference.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::UnknownDomain`] when the id is absent.
    pub fn domain(&self, reference: &str) -> Result<&DomainCredential, CredentialsError> {
        self.domains
            .get(reference)
            .ok_or_else(|| CredentialsError::UnknownDomain(reference.to_owned()))
    }
}

fn read_bundle(path: &Utf8Path) -> Result<String, CredentialsError> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| CredentialsError::Io {
        path: path.to_path_buf(),
        message: String::from("credentials path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        CredentialsError::Io {
            path: parent.to_path_buf(),
            message: describe_io(&err),
        }
    })?;

    dir.read_to_string(file_name)
        .map_err(|err| CredentialsError::Io {
            path: path.to_path_buf(),
            message: describe_io(&err),
        })
}

fn describe_io(err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::NotFound {
        String::from("file not found")
    } else {
        err.to_string()
    }
}
