//! Usage lookup through the ChatGPT backend with the Codex login token.
//!
//! Credentials come from `$CODEX_HOME/auth.json` (default `~/.codex/auth.json`)
//! and are read fresh on every attempt. Tokens are never refreshed, logged or
//! written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{excerpt, FetchError};
use super::strategy::UsageStrategy;
use super::types::{string_or_number, Credits, Source, UsageSnapshot};
use super::windows::{remaining_snapshot, RawWindow};
use crate::config::OAuthSettings;

/// ChatGPT backend endpoint that reports Codex rate limits
pub const USAGE_URL: &str = "https://chatgpt.com/backend-api/wham/usage";

/// Header carrying the ChatGPT account id
pub const ACCOUNT_HEADER: &str = "ChatGPT-Account-Id";

const USER_AGENT: &str = concat!("codex-quota/", env!("CARGO_PKG_VERSION"));

/// Environment variable overriding the Codex home directory
pub const CODEX_HOME_ENV: &str = "CODEX_HOME";

/// Raw layout of `auth.json`
#[derive(Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    tokens: Option<AuthTokens>,
    #[serde(rename = "OPENAI_API_KEY", default)]
    openai_api_key: Option<String>,
}

#[derive(Default, Deserialize)]
struct AuthTokens {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

/// Credentials read from `auth.json`
#[derive(Clone, Default)]
pub struct OAuthCredential {
    pub access_token: Option<String>,
    pub account_id: Option<String>,
    pub refresh_token: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("OAuthCredential")
            .field("access_token", &redact(&self.access_token))
            .field("account_id", &self.account_id)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl OAuthCredential {
    /// Parse the contents of `auth.json`.
    ///
    /// Fails when neither an access token nor an API key is present.
    pub fn parse(content: &str) -> Result<Self, FetchError> {
        let file: AuthFile = serde_json::from_str(content)
            .map_err(|e| FetchError::Credentials(format!("failed to parse auth file: {}", e)))?;
        let tokens = file.tokens.unwrap_or_default();

        let credential = Self {
            access_token: non_empty(tokens.access_token),
            account_id: non_empty(tokens.account_id),
            refresh_token: non_empty(tokens.refresh_token),
            api_key: non_empty(file.openai_api_key),
        };

        if credential.access_token.is_none() && credential.api_key.is_none() {
            return Err(FetchError::Credentials(
                "no valid credentials found in auth.json".to_string(),
            ));
        }
        Ok(credential)
    }

    /// Read and parse the credential file at `path`
    pub fn load(path: &Path) -> Result<Self, FetchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FetchError::Credentials(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// API-key logins have no usage endpoint
    pub fn is_api_key_only(&self) -> bool {
        self.access_token.is_none() && self.api_key.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Codex home: `$CODEX_HOME`, else `~/.codex`
pub fn codex_home() -> Option<PathBuf> {
    match std::env::var_os(CODEX_HOME_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::home_dir().map(|home| home.join(".codex")),
    }
}

/// Default location of `auth.json`
pub fn auth_file_path() -> Option<PathBuf> {
    codex_home().map(|home| home.join("auth.json"))
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    plan_type: Option<String>,
    #[serde(default)]
    rate_limit: Option<RateLimitDetail>,
    #[serde(default)]
    credits: Option<CreditDetail>,
}

#[derive(Debug, Deserialize)]
struct RateLimitDetail {
    #[serde(default)]
    primary_window: Option<WindowDetail>,
    #[serde(default)]
    secondary_window: Option<WindowDetail>,
}

#[derive(Debug, Deserialize)]
struct WindowDetail {
    #[serde(default)]
    used_percent: f64,
    #[serde(default)]
    reset_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreditDetail {
    #[serde(default)]
    has_credits: bool,
    #[serde(default)]
    unlimited: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    balance: Option<String>,
}

impl From<WindowDetail> for RawWindow {
    fn from(w: WindowDetail) -> Self {
        RawWindow {
            used_percent: w.used_percent,
            resets_at: w.reset_at,
        }
    }
}

/// Client for the usage endpoint
#[derive(Debug, Clone)]
pub struct OAuthClient {
    usage_url: String,
    timeout: Duration,
    auth_path: Option<PathBuf>,
}

impl OAuthClient {
    pub fn new(settings: &OAuthSettings) -> Self {
        Self {
            usage_url: settings.usage_url.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            auth_path: None,
        }
    }

    /// Read credentials from an explicit file instead of `$CODEX_HOME`
    pub fn with_auth_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_path = Some(path.into());
        self
    }

    fn resolve_auth_path(&self) -> Result<PathBuf, FetchError> {
        self.auth_path
            .clone()
            .or_else(auth_file_path)
            .ok_or_else(|| FetchError::Credentials("cannot determine home directory".to_string()))
    }

    /// Fetch usage once. Cancellation aborts the wait immediately.
    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        let credential = OAuthCredential::load(&self.resolve_auth_path()?)?;

        if credential.is_api_key_only() {
            return Err(FetchError::NotApplicable(
                "API key mode does not support the OAuth usage API".to_string(),
            ));
        }
        let token = credential
            .access_token
            .ok_or_else(|| FetchError::Credentials("missing access token".to_string()))?;

        let url = self.usage_url.clone();
        let account_id = credential.account_id;
        let timeout = self.timeout;
        let request = tokio::task::spawn_blocking(move || {
            get_usage(&url, &token, account_id.as_deref(), timeout)
        });

        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            joined = request => joined
                .map_err(|e| FetchError::Http(format!("request task failed: {}", e)))??,
        };

        debug!("OAuth usage endpoint answered {}", status);
        let response = check_status(status, &body)?;
        convert_response(response)
    }
}

#[async_trait]
impl UsageStrategy for OAuthClient {
    fn source(&self) -> Source {
        Source::OAuth
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        self.fetch(cancel).await
    }
}

/// Blocking GET against the usage endpoint; returns status and body
fn get_usage(
    url: &str,
    token: &str,
    account_id: Option<&str>,
    timeout: Duration,
) -> Result<(u16, String), FetchError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into();

    let mut request = agent
        .get(url)
        .header("Authorization", format!("Bearer {}", token))
        .header("Accept", "application/json")
        .header("User-Agent", USER_AGENT);
    if let Some(id) = account_id {
        request = request.header(ACCOUNT_HEADER, id);
    }

    let mut response = request.call().map_err(|e| FetchError::Http(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| FetchError::Http(format!("failed to read response: {}", e)))?;
    Ok((status, body))
}

/// Map the HTTP status to a parsed body or a typed failure
fn check_status(status: u16, body: &str) -> Result<UsageResponse, FetchError> {
    match status {
        200 => serde_json::from_str(body)
            .map_err(|e| FetchError::ParseFailure(format!("invalid usage response: {}", e))),
        401 | 403 => Err(FetchError::AuthExpired),
        _ => Err(FetchError::Api {
            status,
            body: excerpt(body, 200),
        }),
    }
}

fn convert_response(response: UsageResponse) -> Result<UsageSnapshot, FetchError> {
    let rate_limit = response.rate_limit.ok_or_else(|| {
        FetchError::ParseFailure("no rate limit data in response".to_string())
    })?;
    let credits = response.credits.map(|c| Credits {
        has_credits: c.has_credits,
        unlimited: c.unlimited,
        balance: c.balance,
    });

    remaining_snapshot(
        Source::OAuth,
        rate_limit.primary_window.map(RawWindow::from),
        rate_limit.secondary_window.map(RawWindow::from),
        response.plan_type,
        credits,
    )
}
