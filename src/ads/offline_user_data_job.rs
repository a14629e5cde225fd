//! Customer Match calls on the Google Ads OfflineUserDataJobService.
//!
//! A job moves through three calls:
//! - `create` registers an empty job bound to one user list
//! - `addOperations` appends batches of create/remove operations
//! - `run` starts asynchronous processing on Google's side
//!
//! # Security
//!
//! - Identifier hashes are never logged
//! - Only the call name, job resource name, and operation counts are logged

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ads::client::AdsClient;
use crate::ads::failure::RpcStatus;
use crate::ads::API_VERSION;
use crate::error::RemoteError;

/// Job type for Customer Match uploads.
const CUSTOMER_MATCH_JOB_TYPE: &str = "CUSTOMER_MATCH_USER_LIST";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Whether the operations in a job add members to or remove members from the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Create,
    Remove,
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Create => f.write_str("create"),
            UploadMode::Remove => f.write_str("remove"),
        }
    }
}

/// One pre-hashed identifier. Both fields may be set when the source entry
/// carries both hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentifier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashed_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashed_phone_number: Option<String>,
}

impl UserIdentifier {
    pub fn email(hash: impl Into<String>) -> Self {
        Self {
            hashed_email: Some(hash.into()),
            hashed_phone_number: None,
        }
    }

    pub fn phone(hash: impl Into<String>) -> Self {
        Self {
            hashed_email: None,
            hashed_phone_number: Some(hash.into()),
        }
    }
}

/// All identifiers describing one person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub user_identifiers: Vec<UserIdentifier>,
}

/// A single job operation. Serializes as `{"create": {...}}` or `{"remove": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UserDataOperation {
    Create(UserData),
    Remove(UserData),
}

impl UserDataOperation {
    pub fn new(mode: UploadMode, data: UserData) -> Self {
        match mode {
            UploadMode::Create => UserDataOperation::Create(data),
            UploadMode::Remove => UserDataOperation::Remove(data),
        }
    }

    pub fn mode(&self) -> UploadMode {
        match self {
            UserDataOperation::Create(_) => UploadMode::Create,
            UserDataOperation::Remove(_) => UploadMode::Remove,
        }
    }

    pub fn data(&self) -> &UserData {
        match self {
            UserDataOperation::Create(data) | UserDataOperation::Remove(data) => data,
        }
    }
}

/// Server-assigned job resource name, e.g. `customers/123/offlineUserDataJobs/456`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self(resource_name.into())
    }

    pub fn resource_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The account and Customer Match list a job writes to. Ids are digits only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTarget {
    pub customer_id: String,
    pub user_list_id: String,
}

impl ListTarget {
    pub fn user_list_resource_name(&self) -> String {
        format!(
            "customers/{}/userLists/{}",
            self.customer_id, self.user_list_id
        )
    }
}

/// Result of an `addOperations` call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOperationsResponse {
    /// Present when individual operations were rejected.
    #[serde(default)]
    pub partial_failure_error: Option<RpcStatus>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    job: JobSpec<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobSpec<'a> {
    #[serde(rename = "type")]
    job_type: &'a str,
    customer_match_user_list_metadata: UserListMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserListMetadata {
    user_list: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    #[serde(default)]
    resource_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddOperationsRequest<'a> {
    enable_partial_failure: bool,
    operations: &'a [UserDataOperation],
}

/// `run` returns a long-running operation; only its name is of interest.
#[derive(Debug, Deserialize)]
struct RunJobResponse {
    #[serde(default)]
    name: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// OfflineUserDataJobClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the three OfflineUserDataJobService calls used by an upload.
#[derive(Clone)]
pub struct OfflineUserDataJobClient {
    ads: AdsClient,
}

impl OfflineUserDataJobClient {
    pub fn new(ads: AdsClient) -> Self {
        Self { ads }
    }

    /// Creates an empty Customer Match job bound to `target`'s user list.
    ///
    /// # Errors
    ///
    /// Any `RemoteError`; a 2xx answer without a resource name is a `Decode` error.
    pub async fn create_job(&self, target: &ListTarget) -> Result<JobHandle, RemoteError> {
        let path = format!(
            "/{}/customers/{}/offlineUserDataJobs:create",
            API_VERSION, target.customer_id
        );
        let request = CreateJobRequest {
            job: JobSpec {
                job_type: CUSTOMER_MATCH_JOB_TYPE,
                customer_match_user_list_metadata: UserListMetadata {
                    user_list: target.user_list_resource_name(),
                },
            },
        };

        let response: CreateJobResponse = self.ads.post_json(&path, &request).await?;

        if response.resource_name.is_empty() {
            return Err(RemoteError::Decode(
                "Job creation response carried no resource name".to_string(),
            ));
        }

        info!("[ADS-JOB] Created job {}", response.resource_name);
        Ok(JobHandle::new(response.resource_name))
    }

    /// Appends `operations` to the job with partial failure enabled.
    pub async fn add_operations(
        &self,
        job: &JobHandle,
        operations: &[UserDataOperation],
    ) -> Result<AddOperationsResponse, RemoteError> {
        let path = format!("/{}/{}:addOperations", API_VERSION, job.resource_name());
        let request = AddOperationsRequest {
            enable_partial_failure: true,
            operations,
        };

        let response: AddOperationsResponse = self.ads.post_json(&path, &request).await?;

        if response.partial_failure_error.is_some() {
            warn!(
                "[ADS-JOB] {} accepted {} operations with partial failures",
                job,
                operations.len()
            );
        } else {
            info!("[ADS-JOB] {} accepted {} operations", job, operations.len());
        }
        Ok(response)
    }

    /// Starts asynchronous processing of the job.
    pub async fn run_job(&self, job: &JobHandle) -> Result<(), RemoteError> {
        let path = format!("/{}/{}:run", API_VERSION, job.resource_name());

        let response: RunJobResponse = self.ads.post_json(&path, &serde_json::json!({})).await?;

        info!(
            "[ADS-JOB] Run requested for {} (operation: {})",
            job,
            response.name.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
