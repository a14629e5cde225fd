//! Command-line and environment configuration.
//!
//! Every value can be given as a flag or through the environment (a `.env`
//! file is loaded first by `main`). Raw arguments are validated into
//! immutable config structs before any work starts.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use url::Url;

use crate::ads::oauth::OAuthClient;
use crate::ads::{ListTarget, UploadMode, DEFAULT_BASE_URL, DEFAULT_TOKEN_URL};
use crate::error::AppError;
use crate::upload::batch::{BatchSize, DEFAULT_BATCH_SIZE};
use crate::upload::orchestrator::UploadSettings;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "match-list-upload",
    version,
    about = "Upload hashed contacts to a Google Ads Customer Match list"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add or remove list members from an operations JSON file
    Upload(UploadArgs),
    /// Serve the HTTP to stdio JSON-RPC bridge
    Bridge(BridgeArgs),
}

#[derive(Args)]
pub struct UploadArgs {
    /// JSON file with an `operations` list
    pub json_file: PathBuf,

    /// Whether to add (`create`) or remove (`remove`) the listed users
    #[arg(value_enum)]
    pub mode: UploadMode,

    /// Google Ads customer id that owns the list (dashes allowed).
    ///
    /// Environment variable: `GADS_ACCOUNT_ID`
    #[arg(long, env = "GADS_ACCOUNT_ID")]
    pub customer_id: String,

    /// Customer Match user list id.
    ///
    /// Environment variable: `CUSTOMER_MATCH_LIST_ID`
    #[arg(long, env = "CUSTOMER_MATCH_LIST_ID")]
    pub user_list_id: String,

    /// Manager account the calls are made through.
    ///
    /// Environment variable: `GADS_LIVE_MCC_ID`
    #[arg(long, env = "GADS_LIVE_MCC_ID")]
    pub login_customer_id: Option<String>,

    /// Environment variable: `GAdsAPI`
    #[arg(long, env = "GAdsAPI", hide_env_values = true)]
    pub developer_token: String,

    /// Pre-acquired OAuth access token. Skips the refresh exchange when set.
    ///
    /// Environment variable: `GOOGLE_ADS_ACCESS_TOKEN`
    #[arg(long, env = "GOOGLE_ADS_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Environment variable: `CLIENT_ID`
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Environment variable: `CLIENT_SECRET`
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Environment variable: `GOOGLE_REFRESH_TOKEN`
    #[arg(long, env = "GOOGLE_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Operations per `addOperations` call (1 to 10000).
    ///
    /// Environment variable: `UPLOAD_BATCH_SIZE`
    #[arg(long, env = "UPLOAD_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Batches allowed in flight at once. 1 keeps strict submission order.
    ///
    /// Environment variable: `UPLOAD_CONCURRENCY`
    #[arg(long, env = "UPLOAD_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Deadline for each remote call, in seconds.
    ///
    /// Environment variable: `ADS_REQUEST_TIMEOUT_SECS`
    #[arg(long, env = "ADS_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// Print the upload result, or the failure, as one JSON object on stdout.
    #[arg(long)]
    pub json: bool,

    /// Environment variable: `GOOGLE_ADS_BASE_URL`
    #[arg(long, env = "GOOGLE_ADS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Environment variable: `GOOGLE_OAUTH_TOKEN_URL`
    #[arg(long, env = "GOOGLE_OAUTH_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,
}

#[derive(Args)]
pub struct BridgeArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `BRIDGE_ADDR`
    #[arg(long, env = "BRIDGE_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Program started for every request.
    ///
    /// Environment variable: `BRIDGE_COMMAND`
    #[arg(long, env = "BRIDGE_COMMAND", default_value = "python3")]
    pub command: String,

    /// Space-separated arguments for the program.
    ///
    /// Environment variable: `BRIDGE_ARGS`
    #[arg(
        long,
        env = "BRIDGE_ARGS",
        value_delimiter = ' ',
        default_value = "google_ads_server.py"
    )]
    pub args: Vec<String>,

    /// Working directory for the program.
    ///
    /// Environment variable: `BRIDGE_WORKDIR`
    #[arg(long, env = "BRIDGE_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Seconds to wait for the program's reply.
    ///
    /// Environment variable: `BRIDGE_TIMEOUT_SECS`
    #[arg(long, env = "BRIDGE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Name reported by the health endpoint.
    ///
    /// Environment variable: `BRIDGE_SERVER_NAME`
    #[arg(long, env = "BRIDGE_SERVER_NAME", default_value = "Google Ads MCP Server")]
    pub server_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Validated Config
// ─────────────────────────────────────────────────────────────────────────────

/// How the upload obtains its access token.
#[derive(Debug)]
pub enum CredentialSource {
    AccessToken(SecretString),
    RefreshToken {
        client: OAuthClient,
        refresh_token: SecretString,
    },
}

#[derive(Debug)]
pub struct UploadConfig {
    pub json_file: PathBuf,
    pub mode: UploadMode,
    pub target: ListTarget,
    pub login_customer_id: Option<String>,
    pub developer_token: SecretString,
    pub credentials: CredentialSource,
    pub settings: UploadSettings,
    pub base_url: Url,
    pub token_url: Url,
}

impl TryFrom<UploadArgs> for UploadConfig {
    type Error = AppError;

    fn try_from(args: UploadArgs) -> Result<Self, Self::Error> {
        let target = ListTarget {
            customer_id: account_id("GADS_ACCOUNT_ID", &args.customer_id)?,
            user_list_id: account_id("CUSTOMER_MATCH_LIST_ID", &args.user_list_id)?,
        };

        let login_customer_id = match present(args.login_customer_id) {
            Some(raw) => Some(account_id("GADS_LIVE_MCC_ID", &raw)?),
            None => None,
        };

        let developer_token = present(Some(args.developer_token))
            .ok_or_else(|| AppError::Config("GAdsAPI must not be empty".to_string()))?;

        let credentials = match present(args.access_token) {
            Some(token) => CredentialSource::AccessToken(SecretString::from(token)),
            None => match (
                present(args.client_id),
                present(args.client_secret),
                present(args.refresh_token),
            ) {
                (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                    CredentialSource::RefreshToken {
                        client: OAuthClient {
                            client_id,
                            client_secret: SecretString::from(client_secret),
                        },
                        refresh_token: SecretString::from(refresh_token),
                    }
                }
                _ => {
                    return Err(AppError::Config(
                        "No credentials: provide an access token, or an OAuth client id, client secret and refresh token"
                            .to_string(),
                    ))
                }
            },
        };

        let concurrency = NonZeroUsize::new(args.concurrency).ok_or_else(|| {
            AppError::Config("UPLOAD_CONCURRENCY must be greater than 0".to_string())
        })?;

        if args.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "ADS_REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            json_file: args.json_file,
            mode: args.mode,
            target,
            login_customer_id,
            developer_token: SecretString::from(developer_token),
            credentials,
            settings: UploadSettings {
                batch_size: BatchSize::new(args.batch_size)?,
                concurrency,
                call_timeout: Duration::from_secs(args.request_timeout_secs),
            },
            base_url: parse_url("GOOGLE_ADS_BASE_URL", &args.base_url)?,
            token_url: parse_url("GOOGLE_OAUTH_TOKEN_URL", &args.token_url)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub addr: SocketAddr,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub server_name: String,
}

impl TryFrom<BridgeArgs> for BridgeConfig {
    type Error = AppError;

    fn try_from(args: BridgeArgs) -> Result<Self, Self::Error> {
        let addr = args
            .addr
            .parse()
            .map_err(|_| AppError::Config(format!("BRIDGE_ADDR is not a socket address: {}", args.addr)))?;

        if args.command.trim().is_empty() {
            return Err(AppError::Config("BRIDGE_COMMAND must not be empty".to_string()));
        }

        if args.timeout_secs == 0 {
            return Err(AppError::Config(
                "BRIDGE_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            addr,
            program: args.command,
            args: args.args.into_iter().filter(|a| !a.is_empty()).collect(),
            working_dir: args.workdir,
            timeout: Duration::from_secs(args.timeout_secs),
            server_name: args.server_name,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Treats blank values as unset.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Normalizes `123-456-7890` to `1234567890`.
fn account_id(name: &str, raw: &str) -> Result<String, AppError> {
    let id: String = raw.trim().chars().filter(|c| *c != '-').collect();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Config(format!(
            "{} must be a numeric id, got {:?}",
            name, raw
        )));
    }
    Ok(id)
}

fn parse_url(name: &str, raw: &str) -> Result<Url, AppError> {
    Url::parse(raw).map_err(|e| AppError::Config(format!("{} is not a valid URL: {}", name, e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
