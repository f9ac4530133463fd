//! `russh`-backed implementation of [`RemoteExecutor`].

use std::sync::Arc;
use std::time::Duration;

use russh::keys::{PrivateKey, PublicKey, key::PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect, client};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{RemoteError, RemoteExecutor, RemoteFuture, RemoteOutput};
use crate::credentials::{ServerCredential, ServerSecret};

/// Extended-data stream number carrying stderr.
const STDERR_STREAM: u32 = 1;

/// Timeouts applied by [`SshExecutor`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Bound on connecting and authenticating.
    pub connect_timeout: Duration,
    /// Bound on a single command once the session is open.
    pub command_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Accepts any host key; host provisioning owns key distribution.
struct AcceptingHandler;

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Runs commands over a fresh SSH session per call.
#[derive(Clone, Debug, Default)]
pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    /// Creates an executor with the supplied timeouts.
    #[must_use]
    pub const fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    async fn connect(
        &self,
        credential: &ServerCredential,
    ) -> Result<client::Handle<AcceptingHandler>, RemoteError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.settings.command_timeout),
            ..<_>::default()
        });
        let address = (credential.host.as_str(), credential.port);
        let mut session = client::connect(config, address, AcceptingHandler)
            .await
            .map_err(|err| RemoteError::Connect {
                host: credential.host.clone(),
                message: err.to_string(),
            })?;

        let accepted = match &credential.secret {
            ServerSecret::Password { password } => session
                .authenticate_password(&credential.username, password)
                .await
                .map_err(|err| connect_error(credential, &err))?
                .success(),
            ServerSecret::PrivateKey {
                private_key,
                passphrase,
            } => {
                let key = decode_key(credential, private_key, passphrase.as_deref())?;
                let best_hash = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|err| connect_error(credential, &err))?
                    .flatten();
                session
                    .authenticate_publickey(
                        &credential.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), best_hash),
                    )
                    .await
                    .map_err(|err| connect_error(credential, &err))?
                    .success()
            }
        };

        if !accepted {
            return Err(RemoteError::Authentication {
                user: credential.username.clone(),
                host: credential.host.clone(),
            });
        }
        Ok(session)
    }

    async fn run(
        session: &client::Handle<AcceptingHandler>,
        credential: &ServerCredential,
        command: &str,
    ) -> Result<RemoteOutput, RemoteError> {
        let channel_error = |err: russh::Error| RemoteError::Channel {
            host: credential.host.clone(),
            message: err.to_string(),
        };
        let mut channel = session.channel_open_session().await.map_err(channel_error)?;
        channel.exec(true, command).await.map_err(channel_error)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_STREAM => {
                    stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(i32::try_from(exit_status).unwrap_or(i32::MAX));
                }
                _ => {}
            }
        }

        Ok(RemoteOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

impl RemoteExecutor for SshExecutor {
    fn exec<'a>(
        &'a self,
        credential: &'a ServerCredential,
        command: &'a str,
    ) -> RemoteFuture<'a, RemoteOutput> {
        Box::pin(async move {
            let session = timeout(self.settings.connect_timeout, self.connect(credential))
                .await
                .map_err(|_| RemoteError::Timeout {
                    host: credential.host.clone(),
                    operation: "SSH connect",
                })??;

            let outcome = timeout(
                self.settings.command_timeout,
                Self::run(&session, credential, command),
            )
            .await
            .map_err(|_| RemoteError::Timeout {
                host: credential.host.clone(),
                operation: "remote command",
            });

            if let Err(err) = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                debug!(host = %credential.host, error = %err, "SSH disconnect failed");
            }

            let output = outcome??;
            info!(
                host = %credential.host,
                exit_code = output.exit_code,
                "remote command finished"
            );
            Ok(output)
        })
    }
}

fn decode_key(
    credential: &ServerCredential,
    encoded: &str,
    passphrase: Option<&str>,
) -> Result<PrivateKey, RemoteError> {
    russh::keys::decode_secret_key(encoded.trim(), passphrase).map_err(|err| {
        RemoteError::InvalidCredential {
            host: credential.host.clone(),
            message: err.to_string(),
        }
    })
}

fn connect_error(credential: &ServerCredential, err: &russh::Error) -> RemoteError {
    RemoteError::Connect {
        host: credential.host.clone(),
        message: err.to_string(),
    }
}
