use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::ads::failure::ErrorReport;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
    "developer-token",
    "developer_token",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote call stages
// ─────────────────────────────────────────────────────────────────────────────

/// The remote call that was in flight when a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStage {
    /// Exchanging the refresh token for an access token.
    Authenticate,
    /// Creating the offline user data job.
    CreateJob,
    /// Adding one batch of operations to the job (1-based batch number).
    SubmitBatch {
        job: String,
        batch: usize,
        total_batches: usize,
    },
    /// Triggering asynchronous execution of the job.
    RunJob { job: String },
}

impl fmt::Display for RemoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStage::Authenticate => write!(f, "authentication"),
            RemoteStage::CreateJob => write!(f, "job creation"),
            RemoteStage::SubmitBatch {
                batch,
                total_batches,
                ..
            } => write!(f, "batch {}/{}", batch, total_batches),
            RemoteStage::RunJob { .. } => write!(f, "job run"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RemoteError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of a single remote call, before it is attributed to a stage.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a structured (or at least non-2xx) error.
    #[error("{0}")]
    Api(ErrorReport),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Network(String),

    /// A 2xx response whose body could not be understood.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Returns true for timeouts and connectivity failures.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Timeout(_) | RemoteError::Network(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AppError
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification used by callers to choose a recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StructuralInput,
    JobCreation,
    BatchSubmission,
    RunTrigger,
    TransientNetwork,
    Configuration,
    Authentication,
    Bridge,
    Internal,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Input ─────────────────────────────────────────────────────────────────
    #[error("Cannot read operations file: {0}")]
    InputFile(String),

    /// Malformed operation or identifier shape. `operation` is the 0-based
    /// index of the offending operation when one can be named.
    #[error("{}", structural_message(.operation, .message))]
    StructuralInput {
        operation: Option<usize>,
        message: String,
    },

    // ── Remote job lifecycle ──────────────────────────────────────────────────
    #[error("Job creation failed: {0}")]
    JobCreation(ErrorReport),

    #[error("Batch {batch}/{total_batches} submission failed: {report}")]
    BatchSubmission {
        job: String,
        batch: usize,
        total_batches: usize,
        report: ErrorReport,
    },

    #[error("Job {job} was populated but could not be run: {report}")]
    RunTrigger { job: String, report: ErrorReport },

    #[error("Network failure during {stage}: {message}")]
    TransientNetwork { stage: RemoteStage, message: String },

    // ── Setup ─────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    // ── Bridge ────────────────────────────────────────────────────────────────
    #[error("MCP server timeout after {0:?}")]
    BridgeTimeout(Duration),

    #[error("MCP server error: {0}")]
    BridgeProcess(String),

    #[error("Invalid JSON response: {0}")]
    BridgeProtocol(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

fn structural_message(operation: &Option<usize>, message: &str) -> String {
    match operation {
        Some(index) => format!("Malformed operation #{}: {}", index, message),
        None => format!("Malformed operations file: {}", message),
    }
}

impl AppError {
    /// Attributes a remote failure to the stage it happened in.
    ///
    /// Timeouts and connectivity failures become `TransientNetwork` regardless
    /// of stage; everything else maps to the stage-specific variant.
    pub fn from_remote(stage: RemoteStage, err: RemoteError) -> Self {
        if err.is_transient() {
            return AppError::TransientNetwork {
                message: err.to_string(),
                stage,
            };
        }

        let report = match err {
            RemoteError::Api(report) => report,
            other => ErrorReport::single(other.to_string()),
        };

        match stage {
            RemoteStage::Authenticate => AppError::Authentication(report.summary()),
            RemoteStage::CreateJob => AppError::JobCreation(report),
            RemoteStage::SubmitBatch {
                job,
                batch,
                total_batches,
            } => AppError::BatchSubmission {
                job,
                batch,
                total_batches,
                report,
            },
            RemoteStage::RunJob { job } => AppError::RunTrigger { job, report },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InputFile(_) | AppError::StructuralInput { .. } => {
                ErrorKind::StructuralInput
            }
            AppError::JobCreation(_) => ErrorKind::JobCreation,
            AppError::BatchSubmission { .. } => ErrorKind::BatchSubmission,
            AppError::RunTrigger { .. } => ErrorKind::RunTrigger,
            AppError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            AppError::Config(_) => ErrorKind::Configuration,
            AppError::Authentication(_) => ErrorKind::Authentication,
            AppError::BridgeTimeout(_)
            | AppError::BridgeProcess(_)
            | AppError::BridgeProtocol(_) => ErrorKind::Bridge,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Resource name of the job a failure left behind, if one was created.
    ///
    /// A job named here holds every batch accepted before the failure and
    /// has not been run.
    pub fn job_resource_name(&self) -> Option<&str> {
        match self {
            AppError::BatchSubmission { job, .. } | AppError::RunTrigger { job, .. } => {
                Some(job.as_str())
            }
            AppError::TransientNetwork {
                stage: RemoteStage::SubmitBatch { job, .. } | RemoteStage::RunJob { job },
                ..
            } => Some(job.as_str()),
            _ => None,
        }
    }

    /// Returns the (message, field path) listing for this error.
    ///
    /// Protocol-level failures carry the service's own error list; every
    /// other error is surfaced as a single opaque message.
    pub fn report(&self) -> ErrorReport {
        match self {
            AppError::JobCreation(report)
            | AppError::BatchSubmission { report, .. }
            | AppError::RunTrigger { report, .. } => report.clone(),
            other => ErrorReport::single(other.to_string()),
        }
    }

    /// Converts the error into a user-friendly presentation.
    /// Never leaks secrets, tokens, or credentials.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Input ─────────────────────────────────────────────────────────
            AppError::InputFile(msg) => ErrorPresentation {
                title: "Cannot Read Operations".into(),
                message: format!("The operations file could not be read: {}", msg),
                action: Some("Check the file path and permissions".into()),
            },

            AppError::StructuralInput { .. } => ErrorPresentation {
                title: "Invalid Operations File".into(),
                message: self.to_string(),
                action: Some("Fix the operations file and try again".into()),
            },

            // ── Remote job lifecycle ──────────────────────────────────────────
            AppError::JobCreation(report) => ErrorPresentation {
                title: "Job Creation Failed".into(),
                message: sanitize_message(
                    &report.summary(),
                    "Google Ads rejected the job creation request.",
                ),
                action: Some("Check the customer and user list ids".into()),
            },

            AppError::BatchSubmission {
                batch,
                total_batches,
                report,
                ..
            } => ErrorPresentation {
                title: "Batch Upload Failed".into(),
                message: format!(
                    "Batch {}/{} was rejected; later batches were not sent and earlier ones remain on the job. {}",
                    batch,
                    total_batches,
                    sanitize_message(&report.summary(), "")
                )
                .trim_end()
                .to_string(),
                action: Some("Re-run with the remaining operations".into()),
            },

            AppError::RunTrigger { report, .. } => ErrorPresentation {
                title: "Job Not Started".into(),
                message: format!(
                    "All batches were uploaded but the job could not be started. {}",
                    sanitize_message(&report.summary(), "")
                )
                .trim_end()
                .to_string(),
                action: Some("Re-run the upload".into()),
            },

            AppError::TransientNetwork {
                stage: stage @ RemoteStage::SubmitBatch { .. },
                ..
            } => ErrorPresentation {
                title: "Connection Failed".into(),
                message: format!(
                    "Could not reach Google Ads during {}; later batches were not sent and earlier ones remain on the job.",
                    stage
                ),
                action: Some("Check network and re-run with the remaining operations".into()),
            },

            AppError::TransientNetwork { stage, .. } => ErrorPresentation {
                title: "Connection Failed".into(),
                message: format!(
                    "Could not reach Google Ads during {}. Please check your network connection.",
                    stage
                ),
                action: Some("Check network and retry".into()),
            },

            // ── Setup ─────────────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Check command-line arguments and environment".into()),
            },

            AppError::Authentication(_) => ErrorPresentation {
                title: "Authentication Failed".into(),
                message: "Could not obtain a Google Ads access token.".into(),
                action: Some("Re-authorize and update the refresh token".into()),
            },

            // ── Bridge ────────────────────────────────────────────────────────
            AppError::BridgeTimeout(_) => ErrorPresentation {
                title: "MCP Server Timeout".into(),
                message: "The MCP server did not answer in time.".into(),
                action: Some("Retry the request".into()),
            },

            AppError::BridgeProcess(msg) | AppError::BridgeProtocol(msg) => ErrorPresentation {
                title: "MCP Server Error".into(),
                message: sanitize_message(msg, "The MCP server failed."),
                action: None,
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

/// Machine-readable failure, as printed by `upload --json`.
#[derive(Serialize)]
struct ErrorOutput<'a> {
    kind: ErrorKind,
    #[serde(flatten)]
    presentation: ErrorPresentation,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<&'a str>,
    details: Vec<String>,
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let details = match self.kind() {
            ErrorKind::JobCreation | ErrorKind::BatchSubmission | ErrorKind::RunTrigger => {
                self.report().lines()
            }
            _ => Vec::new(),
        };

        ErrorOutput {
            kind: self.kind(),
            presentation: self.to_presentation(),
            job: self.job_resource_name(),
            details,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::failure::ErrorDetail;

    fn report(msg: &str) -> ErrorReport {
        ErrorReport::single(msg)
    }

    /// Returns all AppError variants for exhaustive testing.
    fn all_variants() -> Vec<AppError> {
        vec![
            AppError::InputFile("No such file".into()),
            AppError::StructuralInput {
                operation: Some(3),
                message: "expected a list".into(),
            },
            AppError::StructuralInput {
                operation: None,
                message: "not an object".into(),
            },
            AppError::JobCreation(report("user list not found")),
            AppError::BatchSubmission {
                job: "customers/1/offlineUserDataJobs/2".into(),
                batch: 2,
                total_batches: 3,
                report: report("too many operations"),
            },
            AppError::RunTrigger {
                job: "customers/1/offlineUserDataJobs/2".into(),
                report: report("job already running"),
            },
            AppError::TransientNetwork {
                stage: RemoteStage::CreateJob,
                message: "timeout".into(),
            },
            AppError::Config("batch size must be positive".into()),
            AppError::Authentication("invalid_grant".into()),
            AppError::BridgeTimeout(Duration::from_secs(30)),
            AppError::BridgeProcess("No response from MCP server".into()),
            AppError::BridgeProtocol("expected value".into()),
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn transient_remote_errors_map_to_transient_network() {
        let err = AppError::from_remote(
            RemoteStage::SubmitBatch {
                job: "customers/1/offlineUserDataJobs/2".into(),
                batch: 1,
                total_batches: 2,
            },
            RemoteError::Timeout(Duration::from_secs(5)),
        );
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);

        let err = AppError::from_remote(
            RemoteStage::CreateJob,
            RemoteError::Network("refused".into()),
        );
        assert!(matches!(
            err,
            AppError::TransientNetwork {
                stage: RemoteStage::CreateJob,
                ..
            }
        ));
    }

    #[test]
    fn api_errors_map_to_stage_specific_variants() {
        let create = AppError::from_remote(
            RemoteStage::CreateJob,
            RemoteError::Api(report("bad list")),
        );
        assert_eq!(create.kind(), ErrorKind::JobCreation);

        let submit = AppError::from_remote(
            RemoteStage::SubmitBatch {
                job: "customers/1/offlineUserDataJobs/2".into(),
                batch: 2,
                total_batches: 3,
            },
            RemoteError::Api(report("bad batch")),
        );
        match submit {
            AppError::BatchSubmission {
                job,
                batch,
                total_batches,
                report,
            } => {
                assert_eq!(job, "customers/1/offlineUserDataJobs/2");
                assert_eq!((batch, total_batches), (2, 3));
                assert_eq!(report.summary(), "bad batch");
            }
            other => panic!("Expected BatchSubmission, got: {:?}", other),
        }

        let run = AppError::from_remote(
            RemoteStage::RunJob {
                job: "customers/1/offlineUserDataJobs/9".into(),
            },
            RemoteError::Decode("not json".into()),
        );
        assert_eq!(run.kind(), ErrorKind::RunTrigger);
    }

    #[test]
    fn sub_second_timeouts_keep_their_unit() {
        let err = RemoteError::Timeout(Duration::from_millis(50));
        assert_eq!(err.to_string(), "Request timed out after 50ms");

        let err = AppError::BridgeTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "MCP server timeout after 30s");
    }

    #[test]
    fn job_left_behind_is_named_for_submit_and_run_failures() {
        const JOB: &str = "customers/1/offlineUserDataJobs/2";

        let timed_out = AppError::from_remote(
            RemoteStage::SubmitBatch {
                job: JOB.into(),
                batch: 2,
                total_batches: 3,
            },
            RemoteError::Timeout(Duration::from_secs(1)),
        );
        assert_eq!(timed_out.job_resource_name(), Some(JOB));
        assert!(timed_out
            .to_presentation()
            .message
            .contains("earlier ones remain on the job"));

        let rejected = AppError::from_remote(
            RemoteStage::SubmitBatch {
                job: JOB.into(),
                batch: 2,
                total_batches: 3,
            },
            RemoteError::Api(report("bad batch")),
        );
        assert_eq!(rejected.job_resource_name(), Some(JOB));

        let run = AppError::from_remote(
            RemoteStage::RunJob { job: JOB.into() },
            RemoteError::Api(report("already running")),
        );
        assert_eq!(run.job_resource_name(), Some(JOB));

        let create = AppError::from_remote(
            RemoteStage::CreateJob,
            RemoteError::Network("refused".into()),
        );
        assert_eq!(create.job_resource_name(), None);
    }

    #[test]
    fn report_preserves_field_paths_for_protocol_errors() {
        let report = ErrorReport {
            errors: vec![ErrorDetail {
                message: "Invalid hash".into(),
                field_path: Some("operations[0].create".into()),
                error_code: None,
            }],
            request_id: None,
        };
        let err = AppError::JobCreation(report.clone());
        assert_eq!(err.report(), report);

        let opaque = AppError::InputFile("gone".into()).report();
        assert_eq!(opaque.errors.len(), 1);
        assert!(opaque.errors[0].field_path.is_none());
    }

    #[test]
    fn structural_message_names_operation_index() {
        let err = AppError::StructuralInput {
            operation: Some(7),
            message: "invalid type".into(),
        };
        assert!(err.to_string().contains("#7"));
    }

    #[test]
    fn serialization_produces_valid_json_with_required_fields() {
        for variant in all_variants() {
            let json = serde_json::to_string(&variant)
                .unwrap_or_else(|_| panic!("Failed to serialize {:?}", variant));

            let parsed: serde_json::Value = serde_json::from_str(&json)
                .unwrap_or_else(|_| panic!("Failed to parse JSON for {:?}", variant));

            assert!(parsed.get("kind").is_some());
            assert!(parsed.get("title").is_some());
            assert!(parsed.get("message").is_some());
            assert!(parsed.get("action").is_some());
        }
    }

    #[test]
    fn serialized_batch_failure_names_job_and_details() {
        let err = AppError::BatchSubmission {
            job: "customers/1/offlineUserDataJobs/2".into(),
            batch: 2,
            total_batches: 3,
            report: report("too many operations"),
        };

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "batch_submission");
        assert_eq!(json["job"], "customers/1/offlineUserDataJobs/2");
        assert_eq!(json["details"], serde_json::json!(["Error: too many operations"]));

        let json = serde_json::to_value(AppError::Config("bad".into())).unwrap();
        assert!(json.get("job").is_none());
    }

    #[test]
    fn no_secret_leakage_in_presentation() {
        let test_cases: Vec<(&str, AppError)> = vec![
            (
                "JobCreation",
                AppError::JobCreation(report("Bearer abc123 refresh_token=secret")),
            ),
            (
                "Config",
                AppError::Config("developer-token=abc client_secret=xyz".into()),
            ),
            (
                "Authentication",
                AppError::Authentication("access_token=xyz".into()),
            ),
            ("Internal", AppError::Internal("refresh_token leaked".into())),
            (
                "BridgeProcess",
                AppError::BridgeProcess("Authorization: Bearer token".into()),
            ),
            (
                "BatchSubmission",
                AppError::BatchSubmission {
                    job: "customers/1/offlineUserDataJobs/2".into(),
                    batch: 1,
                    total_batches: 1,
                    report: report("Bearer token invalid"),
                },
            ),
        ];

        for (label, variant) in test_cases {
            let presentation = variant.to_presentation();
            let output_lower = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !output_lower.contains(pattern),
                    "{} presentation contains sensitive pattern",
                    label
                );
            }
        }
    }
}
