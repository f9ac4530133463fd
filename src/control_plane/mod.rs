//! Client for the tunnel and DNS control-plane REST API.
//!
//! [`ControlPlaneClient::call`] is the single entry point for HTTP traffic:
//! it authenticates, logs the request and the response, and normalises the
//! provider's loose success signalling into [`ControlPlaneError`]. Typed
//! operations used by the sagas sit behind the [`ControlPlane`] trait so they
//! can be replaced with test doubles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::credentials::DomainCredential;

mod envelope;
mod error;

pub use envelope::ApiMessage;
pub use error::ControlPlaneError;

use envelope::{LOG_PREVIEW_CHARS, interpret, preview};

/// Length of the random tunnel secret in bytes.
const TUNNEL_SECRET_BYTES: usize = 32;
/// Suffix the control plane routes tunnel CNAME targets through.
pub const TUNNEL_CNAME_SUFFIX: &str = "cfargotunnel.com";

/// Boxed future returned by [`ControlPlane`] operations.
pub type ControlPlaneFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ControlPlaneError>> + Send + 'a>>;

/// Tunnel resource returned by the control plane.
#[derive(Clone, PartialEq, Eq)]
pub struct CreatedTunnel {
    /// External tunnel identifier.
    pub id: String,
    /// Base64-encoded tunnel secret used by the remote tunnel client.
    pub secret: String,
}

impl fmt::Debug for CreatedTunnel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CreatedTunnel")
            .field("id", &self.id)
            .field("secret", &"***")
            .finish()
    }
}

/// DNS record to create.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsRecordRequest {
    /// Record type, for example `CNAME`.
    pub record_type: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record content.
    pub content: String,
    /// Whether traffic is proxied through the provider edge.
    pub proxied: bool,
    /// Time to live in seconds; `1` selects the provider default.
    pub ttl: u32,
}

impl DnsRecordRequest {
    /// Builds the proxied CNAME that routes `hostname` to a tunnel.
    #[must_use]
    pub fn tunnel_cname(hostname: &str, tunnel_id: &str) -> Self {
        Self {
            record_type: String::from("CNAME"),
            name: hostname.to_owned(),
            content: format!("{tunnel_id}.{TUNNEL_CNAME_SUFFIX}"),
            proxied: true,
            ttl: 1,
        }
    }
}

/// DNS record returned by the control plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedDnsRecord {
    /// External DNS record identifier.
    pub id: String,
}

/// Typed tunnel and DNS operations consumed by the sagas.
///
/// Deletes are idempotent: a resource that no longer exists is reported as
/// success.
pub trait ControlPlane: Send + Sync {
    /// Creates a named tunnel in the credential's account.
    fn create_tunnel<'a>(
        &'a self,
        auth: &'a DomainCredential,
        name: &'a str,
    ) -> ControlPlaneFuture<'a, CreatedTunnel>;

    /// Deletes a tunnel by id.
    fn delete_tunnel<'a>(
        &'a self,
        auth: &'a DomainCredential,
        tunnel_id: &'a str,
    ) -> ControlPlaneFuture<'a, ()>;

    /// Creates a DNS record in the credential's zone.
    fn create_dns_record<'a>(
        &'a self,
        auth: &'a DomainCredential,
        record: &'a DnsRecordRequest,
    ) -> ControlPlaneFuture<'a, CreatedDnsRecord>;

    /// Deletes a DNS record by id.
    fn delete_dns_record<'a>(
        &'a self,
        auth: &'a DomainCredential,
        record_id: &'a str,
    ) -> ControlPlaneFuture<'a, ()>;
}

/// Connection settings for [`ControlPlaneClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base URL without a trailing slash.
    pub api_base: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// HTTP implementation of [`ControlPlane`].
#[derive(Clone, Debug)]
pub struct ControlPlaneClient {
    http: Client,
    api_base: String,
}

impl ControlPlaneClient {
    /// Builds a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Transport`] when the HTTP client cannot
    /// be constructed.
    pub fn new(settings: &ClientSettings) -> Result<Self, ControlPlaneError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(ControlPlaneError::Transport)?;
        Ok(Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_owned(),
        })
    }

    /// Sends an authenticated JSON request and returns the envelope's
    /// `result` (`null` when absent).
    ///
    /// One request entry is logged before sending and one response entry
    /// after, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Api`] when the envelope signals failure,
    /// [`ControlPlaneError::Validation`] when the body is not a valid
    /// envelope, and [`ControlPlaneError::Transport`] or
    /// [`ControlPlaneError::Timeout`] when no response arrives.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        auth: &DomainCredential,
        body: Option<&Value>,
    ) -> Result<Value, ControlPlaneError> {
        let body_preview = body.map_or_else(String::new, |value| {
            preview(&value.to_string(), LOG_PREVIEW_CHARS)
        });
        info!(
            method = %method,
            path,
            token = %auth.token_preview(),
            body = %body_preview,
            "control-plane request"
        );

        match self.send(method.clone(), path, auth, body).await {
            Ok((status, raw)) => {
                let outcome = interpret(status, &raw);
                log_response(&method, path, Some(status), &raw, &outcome);
                outcome
            }
            Err(err) => {
                let outcome = Err(err);
                log_response(&method, path, None, "", &outcome);
                outcome
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        auth: &DomainCredential,
        body: Option<&Value>,
    ) -> Result<(u16, String), ControlPlaneError> {
        let url = format!("{}{path}", self.api_base);
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&auth.api_token);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify_transport(path, err))?;
        let status = response.status().as_u16();
        let raw = response
            .text()
            .await
            .map_err(|err| classify_transport(path, err))?;
        Ok((status, raw))
    }

    /// Confirms the token is accepted by the control plane and returns its
    /// reported status (for example `active`).
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError`] when the call fails or the response
    /// lacks a status.
    pub async fn verify_token(&self, auth: &DomainCredential) -> Result<String, ControlPlaneError> {
        let result = self
            .call(Method::GET, "/user/tokens/verify", auth, None)
            .await?;
        result
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                ControlPlaneError::Validation(String::from("token verification lacks a status"))
            })
    }

    async fn delete_idempotent(
        &self,
        auth: &DomainCredential,
        path: &str,
    ) -> Result<(), ControlPlaneError> {
        match self.call(Method::DELETE, path, auth, None).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                warn!(path, error = %err, "resource already absent; treating delete as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TunnelResult {
    id: Option<String>,
    secret: Option<String>,
    credentials_file: Option<CredentialsFile>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "TunnelSecret")]
    tunnel_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdResult {
    id: Option<String>,
}

impl ControlPlane for ControlPlaneClient {
    fn create_tunnel<'a>(
        &'a self,
        auth: &'a DomainCredential,
        name: &'a str,
    ) -> ControlPlaneFuture<'a, CreatedTunnel> {
        Box::pin(async move {
            let generated_secret = STANDARD.encode(rand::random::<[u8; TUNNEL_SECRET_BYTES]>());
            let body = json!({
                "name": name,
                "tunnel_secret": generated_secret,
                "config_src": "local",
            });
            let path = format!("/accounts/{}/cfd_tunnel", auth.account_id);
            let result = self.call(Method::POST, &path, auth, Some(&body)).await?;

            let parsed: TunnelResult = serde_json::from_value(result).map_err(|err| {
                ControlPlaneError::Validation(format!("unexpected tunnel result: {err}"))
            })?;
            let id = parsed.id.filter(|id| !id.is_empty()).ok_or_else(|| {
                ControlPlaneError::Validation(String::from("tunnel result is missing an id"))
            })?;
            let secret = parsed
                .secret
                .or_else(|| parsed.credentials_file.and_then(|file| file.tunnel_secret))
                .unwrap_or(generated_secret);
            Ok(CreatedTunnel { id, secret })
        })
    }

    fn delete_tunnel<'a>(
        &'a self,
        auth: &'a DomainCredential,
        tunnel_id: &'a str,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/accounts/{}/cfd_tunnel/{tunnel_id}", auth.account_id);
            self.delete_idempotent(auth, &path).await
        })
    }

    fn create_dns_record<'a>(
        &'a self,
        auth: &'a DomainCredential,
        record: &'a DnsRecordRequest,
    ) -> ControlPlaneFuture<'a, CreatedDnsRecord> {
        Box::pin(async move {
            let body = json!({
                "type": record.record_type,
                "name": record.name,
                "content": record.content,
                "proxied": record.proxied,
                "ttl": record.ttl,
            });
            let path = format!("/zones/{}/dns_records", auth.zone_id);
            let result = self.call(Method::POST, &path, auth, Some(&body)).await?;

            let parsed: IdResult = serde_json::from_value(result).map_err(|err| {
                ControlPlaneError::Validation(format!("unexpected DNS record result: {err}"))
            })?;
            let id = parsed.id.filter(|id| !id.is_empty()).ok_or_else(|| {
                ControlPlaneError::Validation(String::from("DNS record result is missing an id"))
            })?;
            Ok(CreatedDnsRecord { id })
        })
    }

    fn delete_dns_record<'a>(
        &'a self,
        auth: &'a DomainCredential,
        record_id: &'a str,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("/zones/{}/dns_records/{record_id}", auth.zone_id);
            self.delete_idempotent(auth, &path).await
        })
    }
}

fn classify_transport(path: &str, err: reqwest::Error) -> ControlPlaneError {
    if err.is_timeout() {
        ControlPlaneError::Timeout {
            path: path.to_owned(),
        }
    } else {
        ControlPlaneError::Transport(err)
    }
}

fn log_response(
    method: &Method,
    path: &str,
    status: Option<u16>,
    raw: &str,
    outcome: &Result<Value, ControlPlaneError>,
) {
    let body = preview(raw, LOG_PREVIEW_CHARS);
    match outcome {
        Ok(_) => info!(method = %method, path, status, body = %body, "control-plane response"),
        Err(err) => warn!(
            method = %method,
            path,
            status,
            body = %body,
            error = %err,
            "control-plane response"
        ),
    }
}
