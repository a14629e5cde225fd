//! HTTP front end for a stdio JSON-RPC server.
//!
//! - `GET /` reports liveness
//! - `POST /` forwards the JSON body to a fresh server process and returns
//!   its reply verbatim
//!
//! Nothing is shared between requests. Request and reply bodies are never
//! logged; only the JSON-RPC method and id are.

pub mod process;

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::AppError;

pub use process::{exchange, BridgeCommand};

const SERVICE_NAME: &str = "MCP HTTP Bridge";

#[derive(Clone)]
struct BridgeState {
    command: Arc<BridgeCommand>,
    server_name: Arc<str>,
}

/// Builds the bridge routes for `config`.
pub fn router(config: &BridgeConfig) -> Router {
    let state = BridgeState {
        command: Arc::new(BridgeCommand {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout,
        }),
        server_name: Arc::from(config.server_name.as_str()),
    };

    Router::new()
        .route("/", get(health).post(forward))
        .with_state(state)
}

/// Binds `config.addr` and serves until Ctrl+C or SIGTERM.
pub async fn serve(config: BridgeConfig) -> Result<(), AppError> {
    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|e| AppError::Config(format!("Cannot listen on {}: {}", config.addr, e)))?;

    info!(
        "[BRIDGE] Listening on {} (command: {})",
        config.addr, config.program
    );
    serve_on(listener, &config, shutdown_signal()).await
}

/// Serves on an already bound listener until `shutdown` completes.
pub async fn serve_on<F>(
    listener: TcpListener,
    config: &BridgeConfig,
    shutdown: F,
) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(config))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Internal(format!("Bridge server failed: {}", e)))
}

async fn health(State(state): State<BridgeState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "mcp_server": &*state.server_name,
    }))
}

async fn forward(State(state): State<BridgeState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();

    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("[BRIDGE] {} rejected: body is not JSON", request_id);
            return detail(
                StatusCode::BAD_REQUEST,
                format!("Request body is not valid JSON: {}", e),
            );
        }
    };

    let method = request.get("method").and_then(Value::as_str).unwrap_or("-");
    let id = request
        .get("id")
        .map(Value::to_string)
        .unwrap_or_else(|| "-".to_string());
    info!(
        "[BRIDGE] {} method={} id={} ({} bytes)",
        request_id,
        method,
        id,
        body.len()
    );

    match exchange(&state.command, &request).await {
        Ok(reply) => {
            info!("[BRIDGE] {} answered", request_id);
            Json(reply).into_response()
        }
        Err(err) => {
            warn!("[BRIDGE] {} failed: {}", request_id, err);
            let (status, message) = match &err {
                AppError::BridgeTimeout(_) => {
                    (StatusCode::REQUEST_TIMEOUT, "MCP server timeout".to_string())
                }
                other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
            };
            detail(status, message)
        }
    }
}

fn detail(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("[BRIDGE] Cannot install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("[BRIDGE] Cannot install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("[BRIDGE] Received Ctrl+C"),
        () = terminate => info!("[BRIDGE] Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn config(program: &str, args: &[&str], timeout: Duration) -> BridgeConfig {
        BridgeConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
            timeout,
            server_name: "Test Server".to_string(),
        }
    }

    /// Starts the bridge on an ephemeral port; dropping the sender stops it.
    async fn start(config: BridgeConfig) -> (String, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = serve_on(listener, &config, async move {
                let _ = rx.await;
            })
            .await;
        });

        (format!("http://{}/", addr), tx)
    }

    #[tokio::test]
    async fn health_reports_service_and_server_name() {
        let (url, _stop) = start(config("cat", &[], Duration::from_secs(5))).await;

        let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(
            body,
            json!({ "status": "ok", "service": "MCP HTTP Bridge", "mcp_server": "Test Server" })
        );
    }

    #[tokio::test]
    async fn post_forwards_to_process_and_returns_reply() {
        let (url, _stop) = start(config("cat", &[], Duration::from_secs(5))).await;
        let request = json!({ "jsonrpc": "2.0", "id": 7, "method": "tools/call" });

        let response = reqwest::Client::new()
            .post(&url)
            .json(&request)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.json::<Value>().await.unwrap(), request);
    }

    #[tokio::test]
    async fn slow_process_maps_to_408() {
        let (url, _stop) = start(config(
            "sh",
            &["-c", "sleep 5"],
            Duration::from_millis(200),
        ))
        .await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({ "id": 1 }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 408);
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({ "detail": "MCP server timeout" })
        );
    }

    #[tokio::test]
    async fn silent_process_maps_to_500() {
        let (url, _stop) = start(config(
            "sh",
            &["-c", "cat > /dev/null"],
            Duration::from_secs(5),
        ))
        .await;

        let response = reqwest::Client::new()
            .post(&url)
            .json(&json!({ "id": 1 }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 500);
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({ "detail": "MCP server error: No response from MCP server" })
        );
    }

    #[tokio::test]
    async fn non_json_body_is_400() {
        let (url, _stop) = start(config("cat", &[], Duration::from_secs(5))).await;

        let response = reqwest::Client::new()
            .post(&url)
            .body("not json")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
    }
}
