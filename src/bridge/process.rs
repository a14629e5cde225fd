//! One-shot JSON-RPC exchange with a stdio subprocess.
//!
//! Each call starts a fresh process, writes the request as a single JSON
//! line, closes stdin, and reads stdout to the end. The child is killed if
//! it does not finish before the deadline.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AppError;

/// Program, arguments and limits for the stdio server.
#[derive(Debug, Clone)]
pub struct BridgeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

/// Sends `request` to a new instance of the server and returns its reply.
///
/// # Errors
///
/// - `AppError::BridgeTimeout` - no complete reply before the deadline
/// - `AppError::BridgeProcess` - the process could not be started or wrote nothing
/// - `AppError::BridgeProtocol` - stdout was not a JSON document
pub async fn exchange(command: &BridgeCommand, request: &Value) -> Result<Value, AppError> {
    let mut line = serde_json::to_vec(request)
        .map_err(|e| AppError::Internal(format!("Failed to encode request: {}", e)))?;
    line.push(b'\n');

    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &command.working_dir {
        process.current_dir(dir);
    }

    let mut child = process
        .spawn()
        .map_err(|e| AppError::BridgeProcess(format!("failed to start {}: {}", command.program, e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::BridgeProcess("stdin unavailable".to_string()))?;

    let start = Instant::now();
    let run = async move {
        match stdin.write_all(&line).await {
            Ok(()) => {}
            // The server may exit without reading; its output still counts.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("[BRIDGE] Server closed stdin early");
            }
            Err(e) => return Err(e),
        }
        drop(stdin);
        child.wait_with_output().await
    };

    // Dropping `run` on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(command.timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(AppError::BridgeProcess(e.to_string())),
        Err(_) => {
            warn!(
                "[BRIDGE] Server did not answer within {}s, killed",
                command.timeout.as_secs()
            );
            return Err(AppError::BridgeTimeout(command.timeout));
        }
    };

    debug!(
        "[BRIDGE] Server exited with {} after {}ms ({} bytes)",
        output.status,
        start.elapsed().as_millis(),
        output.stdout.len()
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        warn!("[BRIDGE] Server stderr: {}", stderr.trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let reply = stdout.trim();
    if reply.is_empty() {
        return Err(AppError::BridgeProcess(
            "No response from MCP server".to_string(),
        ));
    }

    serde_json::from_str(reply).map_err(|e| AppError::BridgeProtocol(e.to_string()))
}
