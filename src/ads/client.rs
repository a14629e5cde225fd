//! Google Ads REST client with secure credential handling and safe logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::ads::failure::ErrorReport;
use crate::error::{AppError, RemoteError};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Google Ads API requests.
const CLIENT_USER_AGENT: &str = concat!("match-list-upload/", env!("CARGO_PKG_VERSION"));

/// Header carrying the Google Ads developer token.
const DEVELOPER_TOKEN_HEADER: &str = "developer-token";

/// Header naming the manager account the call is made through.
const LOGIN_CUSTOMER_ID_HEADER: &str = "login-customer-id";

/// Response header with the server-side request id.
const REQUEST_ID_HEADER: &str = "request-id";

// ─────────────────────────────────────────────────────────────────────────────
// AdsCredentials
// ─────────────────────────────────────────────────────────────────────────────

/// Credentials attached to every Google Ads API call.
///
/// Token fields are wrapped in `SecretString` to prevent accidental exposure
/// through `Debug` or logging.
pub struct AdsCredentials {
    /// OAuth access token.
    pub access_token: SecretString,
    /// Google Ads developer token.
    pub developer_token: SecretString,
    /// Manager (MCC) account id, digits only.
    pub login_customer_id: Option<String>,
}

impl std::fmt::Debug for AdsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsCredentials")
            .field("access_token", &"[REDACTED]")
            .field("developer_token", &"[REDACTED]")
            .field("login_customer_id", &self.login_customer_id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AdsClient
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated JSON client for the Google Ads REST interface.
///
/// Cheap to clone: the HTTP connection pool and credentials are shared.
#[derive(Clone)]
pub struct AdsClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<AdsCredentials>,
    /// Deadline applied to each call, covering both send and body read.
    request_timeout: Duration,
}

impl AdsClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(
        base_url: Url,
        credentials: AdsCredentials,
        request_timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            http: build_http_client(request_timeout)?,
            base_url,
            credentials: Arc::new(credentials),
            request_timeout,
        })
    }

    /// Builds a full URL by joining an API path with the base URL.
    pub fn build_url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|_| RemoteError::Decode(format!("Invalid API path: {}", path)))
    }

    /// POSTs `body` as JSON to `path` and decodes the JSON response.
    ///
    /// An empty 2xx body decodes as `{}`.
    ///
    /// # Errors
    ///
    /// - `RemoteError::Api` - non-2xx response, with the parsed error listing
    /// - `RemoteError::Timeout` - no complete response within the deadline
    /// - `RemoteError::Network` - connection failure
    /// - `RemoteError::Decode` - 2xx response with an unreadable body
    ///
    /// # Security
    ///
    /// - Never logs the Authorization or developer-token headers
    /// - Never logs request or response bodies
    /// - Logs only the URL path
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.build_url(path)?;
        let start = Instant::now();

        let result = tokio::time::timeout(self.request_timeout, self.exchange(&url, body)).await;
        let duration_ms = start.elapsed().as_millis();

        let (status, request_id, text) = match result {
            Ok(Ok(parts)) => parts,
            Ok(Err(err)) => {
                info!("[ADS] POST {} FAILED {}ms", url.path(), duration_ms);
                return Err(err);
            }
            Err(_) => {
                warn!(
                    "[ADS] POST {} TIMEOUT after {}ms",
                    url.path(),
                    duration_ms
                );
                return Err(RemoteError::Timeout(self.request_timeout));
            }
        };

        info!(
            "[ADS] POST {} {} {}ms {}",
            url.path(),
            status.as_u16(),
            duration_ms,
            request_id.as_deref().unwrap_or("-")
        );

        if !status.is_success() {
            let mut report = ErrorReport::from_response(status, &text);
            if report.request_id.is_none() {
                report.request_id = request_id;
            }
            return Err(RemoteError::Api(report));
        }

        let payload = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(payload)
            .map_err(|e| RemoteError::Decode(format!("Failed to parse response: {}", e)))
    }

    /// Sends one request and reads the full body.
    async fn exchange<B>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<(reqwest::StatusCode, Option<String>, String), RemoteError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .post(url.as_str())
            .bearer_auth(self.credentials.access_token.expose_secret())
            .header(
                DEVELOPER_TOKEN_HEADER,
                self.credentials.developer_token.expose_secret(),
            )
            .json(body);

        if let Some(login_customer_id) = &self.credentials.login_customer_id {
            request = request.header(LOGIN_CUSTOMER_ID_HEADER, login_customer_id);
        }

        let response = request.send().await.map_err(|e| map_transport_error(e, self.request_timeout))?;

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let text = response.text().await.map_err(|e| map_transport_error(e, self.request_timeout))?;

        Ok((status, request_id, text))
    }
}

/// Maps a reqwest failure without exposing the raw error, which may contain
/// the full URL.
fn map_transport_error(err: reqwest::Error, deadline: Duration) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(deadline)
    } else {
        RemoteError::Network("Connection to Google Ads failed".to_string())
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(mock_url: &str, timeout: Duration) -> AdsClient {
        let credentials = AdsCredentials {
            access_token: SecretString::from("test_token".to_string()),
            developer_token: SecretString::from("dev_token".to_string()),
            login_customer_id: Some("1112223333".to_string()),
        };
        AdsClient::new(Url::parse(mock_url).unwrap(), credentials, timeout).unwrap()
    }

    #[tokio::test]
    async fn post_json_sends_auth_headers_and_body() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server.uri(), Duration::from_secs(5));

        Mock::given(method("POST"))
            .and(path("/v22/echo"))
            .and(header("Authorization", "Bearer test_token"))
            .and(header("developer-token", "dev_token"))
            .and(header("login-customer-id", "1112223333"))
            .and(body_json(serde_json::json!({ "ping": true })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "pong": 1 })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let value: serde_json::Value = client
            .post_json("/v22/echo", &serde_json::json!({ "ping": true }))
            .await
            .unwrap();

        assert_eq!(value["pong"], 1);
    }

    #[tokio::test]
    async fn empty_success_body_decodes_as_empty_object() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server.uri(), Duration::from_secs(5));

        Mock::given(method("POST"))
            .and(path("/v22/empty"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let value: serde_json::Value = client
            .post_json("/v22/empty", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!({}));
    }

    #[tokio::test]
    async fn error_status_becomes_api_error_with_request_id() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server.uri(), Duration::from_secs(5));

        Mock::given(method("POST"))
            .and(path("/v22/fail"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("request-id", "req-42")
                    .set_body_json(serde_json::json!({
                        "error": {
                            "code": 403,
                            "message": "The caller does not have permission",
                            "status": "PERMISSION_DENIED"
                        }
                    })),
            )
            .mount(&mock_server)
            .await;

        let result: Result<serde_json::Value, _> =
            client.post_json("/v22/fail", &serde_json::json!({})).await;

        match result {
            Err(RemoteError::Api(report)) => {
                assert_eq!(report.summary(), "The caller does not have permission");
                assert_eq!(report.request_id.as_deref(), Some("req-42"));
            }
            other => panic!("Expected Api error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server.uri(), Duration::from_millis(100));

        Mock::given(method("POST"))
            .and(path("/v22/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let result: Result<serde_json::Value, _> =
            client.post_json("/v22/slow", &serde_json::json!({})).await;

        assert!(matches!(result, Err(RemoteError::Timeout(_))));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = test_client(&format!("http://{}", addr), Duration::from_secs(5));
        let result: Result<serde_json::Value, _> =
            client.post_json("/v22/x", &serde_json::json!({})).await;

        match result {
            Err(RemoteError::Network(msg)) => assert!(!msg.contains("127.0.0.1")),
            other => panic!("Expected Network error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_success_body_is_decode_error() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server.uri(), Duration::from_secs(5));

        Mock::given(method("POST"))
            .and(path("/v22/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let result: Result<serde_json::Value, _> =
            client.post_json("/v22/garbled", &serde_json::json!({})).await;

        assert!(matches!(result, Err(RemoteError::Decode(_))));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let credentials = AdsCredentials {
            access_token: SecretString::from("super_secret".to_string()),
            developer_token: SecretString::from("dev_secret".to_string()),
            login_customer_id: None,
        };
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("super_secret"));
        assert!(!debug.contains("dev_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn build_http_client_succeeds() {
        assert!(build_http_client(Duration::from_secs(1)).is_ok());
    }
}
