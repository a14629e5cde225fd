//! Access token refresh against the Google OAuth 2.0 token endpoint.
//!
//! Exchanges a long-lived refresh token for a short-lived access token
//! without user interaction.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};
use url::Url;

use crate::error::{AppError, RemoteError, RemoteStage};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// OAuth client registration used for the refresh grant.
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Response from the token endpoint.
#[derive(Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: String,
}

impl std::fmt::Debug for AccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Refresh
// ─────────────────────────────────────────────────────────────────────────────

/// Exchanges `refresh_token` for a new access token.
///
/// # Errors
///
/// - `AppError::Authentication` - the grant was refused (400/401) or any
///   other non-2xx answer, or the response carried no token
/// - `AppError::TransientNetwork` - the token endpoint could not be reached
///
/// # Security
///
/// Never logs the refresh token, client secret, or the new access token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &Url,
    client: &OAuthClient,
    refresh_token: &SecretString,
    timeout: Duration,
) -> Result<AccessTokenResponse, AppError> {
    info!("[OAUTH] Refreshing access token...");

    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", client.client_id.as_str()),
        ("client_secret", client.client_secret.expose_secret()),
        ("refresh_token", refresh_token.expose_secret()),
    ];

    // The body read shares the deadline with the request.
    let exchange = async {
        let response = http.post(token_url.as_str()).form(&params).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>((status, body))
    };
    let (status, body) = match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(_)) => {
            error!("[OAUTH] Token refresh request failed");
            return Err(AppError::from_remote(
                RemoteStage::Authenticate,
                RemoteError::Network("Failed to connect for token refresh".to_string()),
            ));
        }
        Err(_) => {
            error!("[OAUTH] Token refresh timed out");
            return Err(AppError::from_remote(
                RemoteStage::Authenticate,
                RemoteError::Timeout(timeout),
            ));
        }
    };

    if status.is_success() {
        let token_response: AccessTokenResponse = serde_json::from_slice(&body).map_err(|_| {
            error!("[OAUTH] Failed to parse token refresh response");
            AppError::Authentication("Invalid token refresh response".to_string())
        })?;

        if token_response.access_token.is_empty() {
            return Err(AppError::Authentication(
                "Token response carried no access token".to_string(),
            ));
        }

        info!(
            "[OAUTH] Token refresh successful (expires in {}s)",
            token_response.expires_in.unwrap_or(0)
        );
        Ok(token_response)
    } else if status == reqwest::StatusCode::BAD_REQUEST
        || status == reqwest::StatusCode::UNAUTHORIZED
    {
        // Refresh token revoked, expired, or issued to another client
        error!("[OAUTH] Token refresh rejected: {}", status);
        Err(AppError::Authentication(
            "Refresh token was rejected".to_string(),
        ))
    } else {
        error!("[OAUTH] Token refresh failed with status: {}", status);
        Err(AppError::Authentication(format!(
            "Token refresh failed with HTTP {}",
            status.as_u16()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod wiremock_tests {
    use super::*;
    use crate::error::ErrorKind;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oauth_client() -> OAuthClient {
        OAuthClient {
            client_id: "client-123".to_string(),
            client_secret: SecretString::from("shh".to_string()),
        }
    }

    fn token_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/token", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn refresh_token_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=client-123"))
            .and(body_string_contains("refresh_token=my_refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = refresh_access_token(
            &reqwest::Client::new(),
            &token_url(&mock_server),
            &oauth_client(),
            &SecretString::from("my_refresh".to_string()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(result.access_token, "ya29.fresh");
        assert_eq!(result.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn invalid_grant_is_authentication_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&mock_server)
            .await;

        let err = refresh_access_token(
            &reqwest::Client::new(),
            &token_url(&mock_server),
            &oauth_client(),
            &SecretString::from("stale".to_string()),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn server_error_is_authentication_error_with_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let err = refresh_access_token(
            &reqwest::Client::new(),
            &token_url(&mock_server),
            &oauth_client(),
            &SecretString::from("r".to_string()),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = refresh_access_token(
            &reqwest::Client::new(),
            &Url::parse(&format!("http://{}/token", addr)).unwrap(),
            &oauth_client(),
            &SecretString::from("r".to_string()),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AppError::TransientNetwork {
                stage: RemoteStage::Authenticate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stalled_response_body_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Sends headers promising a body that never arrives.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            refresh_access_token(
                &reqwest::Client::new(),
                &Url::parse(&format!("http://{}/token", addr)).unwrap(),
                &oauth_client(),
                &SecretString::from("r".to_string()),
                Duration::from_millis(200),
            ),
        )
        .await
        .expect("refresh must honor its own deadline")
        .unwrap_err();

        assert!(matches!(
            err,
            AppError::TransientNetwork {
                stage: RemoteStage::Authenticate,
                ..
            }
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let debug = format!("{:?}", oauth_client());
        assert!(!debug.contains("shh"));

        let response = AccessTokenResponse {
            access_token: "ya29.secret".to_string(),
            expires_in: Some(1),
            token_type: "Bearer".to_string(),
        };
        assert!(!format!("{:?}", response).contains("ya29.secret"));
    }
}
