//! Google Ads API access layer.
//!
//! - **client**: authenticated JSON transport with safe logging
//! - **oauth**: refresh-token exchange for an access token
//! - **offline_user_data_job**: Customer Match job create / add / run calls
//! - **failure**: structured error extraction from API responses

pub mod client;
pub mod failure;
pub mod oauth;
pub mod offline_user_data_job;

pub use client::{AdsClient, AdsCredentials};
pub use offline_user_data_job::{
    JobHandle, ListTarget, OfflineUserDataJobClient, UploadMode, UserData, UserDataOperation,
    UserIdentifier,
};

/// REST API version used for every call.
pub const API_VERSION: &str = "v22";

/// Production endpoint for the Google Ads REST interface.
pub const DEFAULT_BASE_URL: &str = "https://googleads.googleapis.com";

/// Google OAuth 2.0 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
