//! Structured error extraction for Google Ads API failures.
//!
//! Google Ads reports errors as a `google.rpc.Status` whose `details` carry a
//! `GoogleAdsFailure` message. Each contained error has a human-readable
//! message, a typed error code, and an optional location expressed as a list
//! of field path elements pointing into the request.
//!
//! The same shape is returned inside `partialFailureError` when a call made
//! with partial failure enabled succeeds overall but rejects individual
//! operations.

use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the `@type` URL that marks a `GoogleAdsFailure` detail entry.
const GOOGLE_ADS_FAILURE_TYPE: &str = "GoogleAdsFailure";

/// Field name of the repeated operations field in mutate-style requests.
const OPERATIONS_FIELD: &str = "operations";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// One error extracted from a failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    /// Dotted path into the request, e.g. `operations[3].create.user_identifiers[0]`.
    pub field_path: Option<String>,
    /// `category.CODE`, e.g. `offlineUserDataJobError.INVALID_SHA256_FORMAT`.
    pub error_code: Option<String>,
}

/// Ordered list of errors surfaced from one failed remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub errors: Vec<ErrorDetail>,
    pub request_id: Option<String>,
}

/// An individual operation rejected inside an otherwise successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedOperation {
    /// 0-based index into the full operation list, when the service named one.
    pub index: Option<usize>,
    pub message: String,
    pub field_path: Option<String>,
}

/// `google.rpc.Status` as rendered by the REST transcoding layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RpcStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAdsFailure {
    #[serde(default)]
    errors: Vec<GoogleAdsError>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAdsError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    location: Option<ErrorLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLocation {
    #[serde(default)]
    field_path_elements: Vec<FieldPathElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldPathElement {
    field_name: String,
    #[serde(default)]
    index: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ErrorReport
// ─────────────────────────────────────────────────────────────────────────────

impl ErrorReport {
    /// A report holding one opaque message with no field path.
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorDetail {
                message: message.into(),
                field_path: None,
                error_code: None,
            }],
            request_id: None,
        }
    }

    /// Builds a report from a non-2xx HTTP response body.
    ///
    /// Prefers the `GoogleAdsFailure` error list, then the status message,
    /// then a generic `HTTP <code> <reason>` line.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
            let report = Self::from_status(&envelope.error);
            if !report.errors.is_empty() {
                return report;
            }
        }

        Self::single(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        ))
    }

    /// Builds a report from an RPC status, e.g. a `partialFailureError`.
    pub fn from_status(status: &RpcStatus) -> Self {
        let mut errors = Vec::new();
        let mut request_id = None;

        for failure in google_ads_failures(status) {
            if request_id.is_none() {
                request_id = failure.request_id.clone();
            }
            errors.extend(failure.errors.iter().map(|e| ErrorDetail {
                message: e.message.clone(),
                field_path: e.location.as_ref().and_then(render_field_path),
                error_code: e.error_code.as_ref().and_then(render_error_code),
            }));
        }

        if errors.is_empty() && !status.message.is_empty() {
            errors.push(ErrorDetail {
                message: status.message.clone(),
                field_path: None,
                error_code: status.status.clone(),
            });
        }

        Self { errors, request_id }
    }

    /// First error message, used as a one-line summary.
    pub fn summary(&self) -> String {
        self.errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    /// Display lines in the `Error:` / `Field:` layout printed by the CLI.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.errors.len() * 2);
        for error in &self.errors {
            match &error.error_code {
                Some(code) => lines.push(format!("Error: {} ({})", error.message, code)),
                None => lines.push(format!("Error: {}", error.message)),
            }
            if let Some(path) = &error.field_path {
                lines.push(format!("Field: {}", path));
            }
        }
        if let Some(request_id) = &self.request_id {
            lines.push(format!("Request ID: {}", request_id));
        }
        lines
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "Unknown error");
        }
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Partial failure
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts the rejected operations from a `partialFailureError`.
///
/// `offset` is the global index of the first operation in the batch, so the
/// returned indices address the full operation list rather than the batch.
pub fn rejected_operations(status: &RpcStatus, offset: usize) -> Vec<RejectedOperation> {
    let mut rejected = Vec::new();

    for failure in google_ads_failures(status) {
        for error in &failure.errors {
            let index = error
                .location
                .as_ref()
                .and_then(operation_index)
                .map(|i| offset + i);
            rejected.push(RejectedOperation {
                index,
                message: error.message.clone(),
                field_path: error.location.as_ref().and_then(render_field_path),
            });
        }
    }

    if rejected.is_empty() && !status.message.is_empty() {
        rejected.push(RejectedOperation {
            index: None,
            message: status.message.clone(),
            field_path: None,
        });
    }

    rejected
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn google_ads_failures(status: &RpcStatus) -> Vec<GoogleAdsFailure> {
    status
        .details
        .iter()
        .filter(|detail| {
            detail
                .get("@type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.ends_with(GOOGLE_ADS_FAILURE_TYPE))
        })
        .filter_map(|detail| serde_json::from_value::<GoogleAdsFailure>(detail.clone()).ok())
        .collect()
}

fn render_field_path(location: &ErrorLocation) -> Option<String> {
    if location.field_path_elements.is_empty() {
        return None;
    }
    let parts: Vec<String> = location
        .field_path_elements
        .iter()
        .map(|el| match el.index {
            Some(i) => format!("{}[{}]", el.field_name, i),
            None => el.field_name.clone(),
        })
        .collect();
    Some(parts.join("."))
}

fn render_error_code(code: &serde_json::Map<String, Value>) -> Option<String> {
    code.iter().next().map(|(category, value)| match value.as_str() {
        Some(v) => format!("{}.{}", category, v),
        None => category.clone(),
    })
}

fn operation_index(location: &ErrorLocation) -> Option<usize> {
    location
        .field_path_elements
        .first()
        .filter(|el| el.field_name == OPERATIONS_FIELD)
        .and_then(|el| el.index)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
