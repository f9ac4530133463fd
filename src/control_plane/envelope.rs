//! Response envelope parsing and failure normalisation.
//!
//! The control plane wraps every payload in
//! `{success?, errors?, messages?, result?}` but does not always set
//! `success`. A response counts as failed when `success` is `false` or when
//! `errors` is non-empty.

use serde::Deserialize;
use serde_json::Value;

use super::error::ControlPlaneError;

/// Maximum number of characters kept when logging payloads.
pub(crate) const LOG_PREVIEW_CHARS: usize = 512;

/// Single error or informational entry from a response envelope.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ApiMessage {
    /// Provider error code, when supplied.
    #[serde(default)]
    pub code: Option<i64>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    errors: Option<Vec<ApiMessage>>,
    #[serde(default)]
    #[expect(dead_code, reason = "validated for shape but not consumed")]
    messages: Option<Vec<Value>>,
    #[serde(default)]
    result: Option<Value>,
}

/// Interprets a raw response body, returning the envelope's `result`.
///
/// A body that is not JSON is a validation failure on 2xx and an API
/// failure without an envelope otherwise, which is never read as
/// not-found.
pub(crate) fn interpret(status: u16, raw: &str) -> Result<Value, ControlPlaneError> {
    let http_failed = !(200..300).contains(&status);
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) if http_failed => return Err(http_failure(status, Vec::new(), false)),
        Err(err) => {
            return Err(ControlPlaneError::Validation(format!(
                "response is not JSON (HTTP {status}): {err}"
            )));
        }
    };
    if !value.is_object() {
        return Err(ControlPlaneError::Validation(format!(
            "response is not a JSON object (HTTP {status})"
        )));
    }
    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|err| ControlPlaneError::Validation(format!("unexpected response shape: {err}")))?;

    let errors = envelope.errors.unwrap_or_default();
    if envelope.success == Some(false) || !errors.is_empty() || http_failed {
        return Err(http_failure(status, errors, true));
    }

    Ok(envelope.result.unwrap_or(Value::Null))
}

fn http_failure(status: u16, errors: Vec<ApiMessage>, enveloped: bool) -> ControlPlaneError {
    let message = if errors.is_empty() {
        format!("request failed with HTTP {status}")
    } else {
        aggregate(&errors)
    };
    ControlPlaneError::Api {
        status,
        errors,
        message,
        enveloped,
    }
}

/// Joins error entries as `(code) message` separated by `; `.
pub(crate) fn aggregate(errors: &[ApiMessage]) -> String {
    errors
        .iter()
        .map(|entry| match entry.code {
            Some(code) => format!("({code}) {}", entry.message),
            None => entry.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shortens `text` to at most `max_chars` characters for logging.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
