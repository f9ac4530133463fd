//! Error types for control-plane calls.

use thiserror::Error;

use super::envelope::ApiMessage;

/// Error code the control plane returns for records that do not exist.
const NOT_FOUND_CODE: i64 = 81044;

/// Errors raised by [`super::ControlPlaneClient`].
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The HTTP client could not be built or the request could not be sent.
    #[error("control-plane transport failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// The request did not complete within the configured timeout.
    #[error("control-plane request to {path} timed out")]
    Timeout {
        /// Path that timed out.
        path: String,
    },
    /// The response could not be parsed or did not have the expected shape.
    #[error("invalid control-plane response: {0}")]
    Validation(String),
    /// The control plane reported a failure.
    #[error("control-plane call failed (HTTP {status}): {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Individual error entries from the response envelope.
        errors: Vec<ApiMessage>,
        /// Aggregated, human-readable message.
        message: String,
        /// Whether the body was a JSON envelope rather than a bare error
        /// page.
        enveloped: bool,
    },
}

impl ControlPlaneError {
    /// Whether the failure means the addressed resource does not exist.
    ///
    /// Deletes treat this as success so teardown and compensation stay
    /// idempotent. A 404 only counts when the control plane itself answered
    /// with an envelope; a bare error page from a proxy or a wrong base URL
    /// says nothing about the resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        let Self::Api {
            status,
            errors,
            message,
            enveloped,
        } = self
        else {
            return false;
        };
        if !enveloped {
            return false;
        }
        if *status == 404 {
            return true;
        }
        if errors.iter().any(|entry| entry.code == Some(NOT_FOUND_CODE)) {
            return true;
        }
        let lowered = message.to_ascii_lowercase();
        lowered.contains("not found") || lowered.contains("does not exist")
    }
}
