//! Customer Match upload pipeline.
//!
//! - **identifiers**: operations file loading and wire user data building
//! - **batch**: order-preserving batch planning
//! - **scheduler**: concurrency limit for batch submission
//! - **orchestrator**: create → submit → run state machine

pub mod batch;
pub mod identifiers;
pub mod orchestrator;
pub mod scheduler;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::ads::oauth::refresh_access_token;
use crate::ads::{AdsClient, AdsCredentials, OfflineUserDataJobClient};
use crate::config::{CredentialSource, UploadConfig};
use crate::error::AppError;

pub use identifiers::{load_operations, OperationRecord};
pub use orchestrator::{UploadOrchestrator, UploadSettings, UploadSummary};

/// Loads the operations file named in `config` and uploads it as one job.
pub async fn execute(config: UploadConfig) -> Result<UploadSummary, AppError> {
    let records = load_operations(&config.json_file).await?;
    execute_records(config, &records).await
}

/// Uploads already loaded `records` using the target and credentials in `config`.
pub async fn execute_records(
    config: UploadConfig,
    records: &[OperationRecord],
) -> Result<UploadSummary, AppError> {
    let access_token = access_token(&config).await?;

    let ads = AdsClient::new(
        config.base_url.clone(),
        AdsCredentials {
            access_token,
            developer_token: SecretString::from(config.developer_token.expose_secret().to_string()),
            login_customer_id: config.login_customer_id.clone(),
        },
        config.settings.call_timeout,
    )?;

    info!(
        "[UPLOAD] Target customers/{} list {} (mode: {})",
        config.target.customer_id, config.target.user_list_id, config.mode
    );

    let orchestrator = UploadOrchestrator::new(
        OfflineUserDataJobClient::new(ads),
        config.target,
        config.settings,
    );
    orchestrator.run(records, config.mode).await
}

async fn access_token(config: &UploadConfig) -> Result<SecretString, AppError> {
    match &config.credentials {
        CredentialSource::AccessToken(token) => {
            Ok(SecretString::from(token.expose_secret().to_string()))
        }
        CredentialSource::RefreshToken {
            client,
            refresh_token,
        } => {
            let http = reqwest::Client::builder()
                .timeout(config.settings.call_timeout)
                .build()
                .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
            let response = refresh_access_token(
                &http,
                &config.token_url,
                client,
                refresh_token,
                config.settings.call_timeout,
            )
            .await?;
            Ok(SecretString::from(response.access_token))
        }
    }
}
