//! JSON-RPC client for `codex app-server`.
//!
//! The helper is spawned in a read-only, untrusted sandbox and spoken to with
//! one JSON object per line on stdin/stdout. Each attempt owns one session;
//! dropping it kills the helper.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::FetchError;
use super::strategy::UsageStrategy;
use super::types::{string_or_number, Credits, Source, UsageSnapshot};
use super::windows::{remaining_snapshot, RawWindow};
use crate::config::Settings;
use crate::utils::find_in_path;

/// Name reported in `initialize`
const CLIENT_NAME: &str = "codex-quota";

/// Lines buffered between the stdout reader and the waiting request
const LINE_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitsResponse {
    #[serde(default)]
    rate_limits: RateLimitSnapshot,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitSnapshot {
    #[serde(default)]
    primary: Option<RateLimitWindow>,
    #[serde(default)]
    secondary: Option<RateLimitWindow>,
    #[serde(default)]
    credits: Option<CreditsSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitWindow {
    #[serde(default)]
    used_percent: f64,
    #[serde(default)]
    resets_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreditsSnapshot {
    #[serde(default)]
    has_credits: bool,
    #[serde(default)]
    unlimited: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    balance: Option<String>,
}

/// Result of `account/read`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub account: Option<AccountDetails>,
    #[serde(default)]
    pub requires_openai_auth: bool,
}

/// Login details of the current account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    /// "chatgpt" or "apiKey"
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
}

/// A running `app-server` with its stdout reader.
///
/// Dropping the session aborts the reader and kills the child.
pub struct RpcSession {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::Receiver<String>,
    errors: mpsc::Receiver<io::Error>,
    reader: JoinHandle<()>,
    stderr_logger: Option<JoinHandle<()>>,
    next_id: u64,
    request_timeout: Duration,
}

impl RpcSession {
    /// Spawn the helper and start reading its stdout
    pub fn spawn(program: &Path, args: &[String], request_timeout: Duration) -> Result<Self, FetchError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::subprocess("failed to start app-server", e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FetchError::Subprocess("app-server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Subprocess("app-server stdout unavailable".to_string()))?;

        let (line_tx, lines) = mpsc::channel(LINE_BUFFER);
        let (error_tx, errors) = mpsc::channel(1);
        let reader = tokio::spawn(read_lines(stdout, line_tx, error_tx));

        let stderr_logger = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("app-server stderr: {}", line);
                }
            })
        });

        debug!("Spawned app-server: {:?} {:?}", program, args);

        Ok(Self {
            child,
            stdin: Some(stdin),
            lines,
            errors,
            reader,
            stderr_logger,
            next_id: 1,
            request_timeout,
        })
    }

    async fn write_message(&mut self, message: &Value) -> Result<(), FetchError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| FetchError::Subprocess("app-server stdin closed".to_string()))?;
        let mut data = serde_json::to_vec(message)
            .map_err(|e| FetchError::subprocess("failed to encode request", e))?;
        data.push(b'\n');
        stdin
            .write_all(&data)
            .await
            .map_err(|e| FetchError::subprocess("failed to write request", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| FetchError::subprocess("failed to flush request", e))
    }

    /// Send a request and wait for the response carrying its id.
    ///
    /// Unparseable lines, notifications, server-initiated requests and
    /// responses to other ids are skipped.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        let id = self.next_id;
        self.next_id += 1;

        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        let deadline = tokio::time::sleep(self.request_timeout);
        tokio::pin!(deadline);

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = &mut deadline => {
                    return Err(FetchError::Timeout(format!(
                        "no response to {} within {:?}",
                        method, self.request_timeout
                    )));
                }
                Some(err) = self.errors.recv() => {
                    return Err(FetchError::subprocess("error reading app-server output", err));
                }
                line = self.lines.recv() => line,
            };

            let Some(line) = line else {
                return Err(FetchError::Subprocess(
                    "app-server closed stdout before responding".to_string(),
                ));
            };

            match match_response(&line, id) {
                Some(Ok(result)) => return Ok(result),
                Some(Err(message)) => return Err(FetchError::Rpc(message)),
                None => continue,
            }
        }
    }

    /// Send a notification; no response is expected
    pub async fn send_notification(&mut self, method: &str, params: Value) -> Result<(), FetchError> {
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    /// `initialize` handshake followed by the `initialized` notification
    pub async fn initialize(&mut self, cancel: &CancellationToken) -> Result<(), FetchError> {
        let params = json!({
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        self.send_request("initialize", params, cancel).await?;
        self.send_notification("initialized", json!({})).await
    }

    /// `account/rateLimits/read`, converted to a remaining-percentage snapshot
    pub async fn read_rate_limits(&mut self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        let result = self
            .send_request("account/rateLimits/read", json!({}), cancel)
            .await?;
        let response: RateLimitsResponse = serde_json::from_value(result)
            .map_err(|e| FetchError::ParseFailure(format!("invalid rate limits: {}", e)))?;
        convert_rate_limits(response.rate_limits)
    }

    /// `account/read`
    pub async fn read_account(&mut self, cancel: &CancellationToken) -> Result<AccountInfo, FetchError> {
        let result = self.send_request("account/read", json!({}), cancel).await?;
        serde_json::from_value(result)
            .map_err(|e| FetchError::ParseFailure(format!("invalid account response: {}", e)))
    }

    /// Close stdin, kill and reap the helper
    pub async fn shutdown(mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            debug!("app-server kill failed: {}", e);
        }
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(logger) = self.stderr_logger.take() {
            logger.abort();
        }
        // No-op when shutdown() already reaped the child
        let _ = self.child.start_kill();
    }
}

async fn read_lines(
    stdout: ChildStdout,
    lines: mpsc::Sender<String>,
    errors: mpsc::Sender<io::Error>,
) {
    let mut reader = BufReader::new(stdout).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = errors.try_send(e);
                break;
            }
        }
    }
}

/// Classify one stdout line against the awaited request id.
///
/// `None` means the line is not the response being waited for.
fn match_response(line: &str, id: u64) -> Option<Result<Value, String>> {
    let message: Value = serde_json::from_str(line.trim()).ok()?;
    if message.get("method").is_some() {
        return None;
    }
    let response_id = message.get("id").and_then(Value::as_u64)?;
    if response_id != id {
        debug!("Skipping response for id {} (waiting for {})", response_id, id);
        return None;
    }

    if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Some(Err(text));
    }
    Some(Ok(message.get("result").cloned().unwrap_or(Value::Null)))
}

fn convert_rate_limits(snapshot: RateLimitSnapshot) -> Result<UsageSnapshot, FetchError> {
    let window = |w: RateLimitWindow| RawWindow {
        used_percent: w.used_percent,
        resets_at: w.resets_at,
    };
    let credits = snapshot.credits.map(|c| Credits {
        has_credits: c.has_credits,
        unlimited: c.unlimited,
        balance: c.balance,
    });
    remaining_snapshot(
        Source::Rpc,
        snapshot.primary.map(window),
        snapshot.secondary.map(window),
        None,
        credits,
    )
}

/// Strategy wrapper: one fresh session per attempt
#[derive(Debug, Clone)]
pub struct RpcClient {
    command: String,
    args: Vec<String>,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            command: settings.codex_command.clone(),
            args: settings.rpc.args.clone(),
            request_timeout: settings.rpc.request_timeout(),
        }
    }

    /// Client for an arbitrary helper program (used by tests and tooling)
    pub fn with_program(command: impl Into<String>, args: Vec<String>, request_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            request_timeout,
        }
    }

    fn resolve(&self) -> Result<PathBuf, FetchError> {
        find_in_path(&self.command).ok_or_else(|| FetchError::ToolNotFound {
            tool: self.command.clone(),
        })
    }

    async fn open(&self, cancel: &CancellationToken) -> Result<RpcSession, FetchError> {
        let program = self.resolve()?;
        let mut session = RpcSession::spawn(&program, &self.args, self.request_timeout)?;
        if let Err(e) = session.initialize(cancel).await {
            session.shutdown().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Rate limits through a fresh session
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        let mut session = self.open(cancel).await?;
        let result = session.read_rate_limits(cancel).await;
        session.shutdown().await;
        result
    }

    /// Account details through a fresh session
    pub async fn account(&self, cancel: &CancellationToken) -> Result<AccountInfo, FetchError> {
        let mut session = self.open(cancel).await?;
        let result = session.read_account(cancel).await;
        session.shutdown().await;
        result
    }
}

#[async_trait]
impl UsageStrategy for RpcClient {
    fn source(&self) -> Source {
        Source::Rpc
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        self.fetch(cancel).await
    }
}
