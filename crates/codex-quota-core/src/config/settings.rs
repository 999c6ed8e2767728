use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::usage::oauth::USAGE_URL;

/// One live acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// ChatGPT usage endpoint with the stored login token
    OAuth,
    /// `codex app-server` JSON-RPC
    Rpc,
    /// `/status` inside a pseudo-terminal
    Cli,
}

/// Application settings (from config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// How long a cached snapshot stays fresh (seconds)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Live strategies, tried in order after the cache
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,

    /// Codex binary name or path
    #[serde(default = "default_codex_command")]
    pub codex_command: String,

    /// Override for the cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub oauth: OAuthSettings,

    #[serde(default)]
    pub rpc: RpcSettings,

    #[serde(default)]
    pub pty: PtySettings,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![StrategyKind::OAuth, StrategyKind::Rpc, StrategyKind::Cli]
}

fn default_codex_command() -> String {
    "codex".to_string()
}

/// OAuth usage endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default = "default_usage_url")]
    pub usage_url: String,

    /// Whole-request timeout (seconds)
    #[serde(default = "default_oauth_timeout")]
    pub timeout_secs: u64,
}

fn default_usage_url() -> String {
    USAGE_URL.to_string()
}

fn default_oauth_timeout() -> u64 {
    30
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            usage_url: default_usage_url(),
            timeout_secs: default_oauth_timeout(),
        }
    }
}

/// App-server RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Per-request response timeout (seconds)
    #[serde(default = "default_rpc_timeout")]
    pub request_timeout_secs: u64,

    /// Arguments passed to the codex binary
    #[serde(default = "default_rpc_args")]
    pub args: Vec<String>,
}

fn default_rpc_timeout() -> u64 {
    15
}

fn default_rpc_args() -> Vec<String> {
    ["-s", "read-only", "-a", "untrusted", "app-server"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_rpc_timeout(),
            args: default_rpc_args(),
        }
    }
}

impl RpcSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pseudo-terminal automation timing and geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtySettings {
    #[serde(default = "default_pty_rows")]
    pub rows: u16,

    #[serde(default = "default_pty_cols")]
    pub cols: u16,

    /// Hard ceiling for the whole session (milliseconds)
    #[serde(default = "default_pty_ceiling")]
    pub ceiling_ms: u64,

    /// Read poll interval (milliseconds)
    #[serde(default = "default_pty_poll")]
    pub poll_ms: u64,

    /// Delay between seeing the prompt and sending `/status` (milliseconds)
    #[serde(default = "default_pty_settle")]
    pub settle_ms: u64,

    /// How long to wait for the status panel after sending (milliseconds)
    #[serde(default = "default_pty_status_wait")]
    pub status_wait_ms: u64,
}

fn default_pty_rows() -> u16 {
    60
}

fn default_pty_cols() -> u16 {
    160
}

fn default_pty_ceiling() -> u64 {
    10_000
}

fn default_pty_poll() -> u64 {
    200
}

fn default_pty_settle() -> u64 {
    800
}

fn default_pty_status_wait() -> u64 {
    5_000
}

impl Default for PtySettings {
    fn default() -> Self {
        Self {
            rows: default_pty_rows(),
            cols: default_pty_cols(),
            ceiling_ms: default_pty_ceiling(),
            poll_ms: default_pty_poll(),
            settle_ms: default_pty_settle(),
            status_wait_ms: default_pty_status_wait(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            strategies: default_strategies(),
            codex_command: default_codex_command(),
            cache_dir: None,
            oauth: OAuthSettings::default(),
            rpc: RpcSettings::default(),
            pty: PtySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from config file or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        // An explicit path must exist
        if let Some(p) = path {
            return Self::from_file(p);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("codex-quota/config.toml")),
            dirs::home_dir().map(|p| p.join(".config/codex-quota/config.toml")),
            dirs::home_dir().map(|p| p.join(".codex-quota.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Validate and normalize settings values
    ///
    /// Zero intervals would turn the PTY loop into a busy spin or expire every
    /// wait immediately, so they are raised to a floor.
    pub fn validate(&mut self) {
        const MIN_POLL_MS: u64 = 10;

        if self.pty.poll_ms < MIN_POLL_MS {
            self.pty.poll_ms = MIN_POLL_MS;
        }
        if self.pty.ceiling_ms < self.pty.poll_ms {
            self.pty.ceiling_ms = self.pty.poll_ms;
        }
        if self.pty.rows == 0 {
            self.pty.rows = default_pty_rows();
        }
        if self.pty.cols == 0 {
            self.pty.cols = default_pty_cols();
        }
        if self.oauth.timeout_secs == 0 {
            self.oauth.timeout_secs = default_oauth_timeout();
        }
        if self.rpc.request_timeout_secs == 0 {
            self.rpc.request_timeout_secs = default_rpc_timeout();
        }
        if self.rpc.args.is_empty() {
            self.rpc.args = default_rpc_args();
        }

        // Keep first occurrence of each strategy
        let mut seen = Vec::with_capacity(self.strategies.len());
        self.strategies.retain(|kind| {
            if seen.contains(kind) {
                false
            } else {
                seen.push(*kind);
                true
            }
        });
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
