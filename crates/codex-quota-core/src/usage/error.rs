//! Strategy-level failures.
//!
//! None of these reach the caller of `UsageFetcher::get_usage`; they are logged
//! and folded into the sentinel snapshot's error message.

use thiserror::Error;

/// Error type for a single acquisition attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// Helper binary is not installed
    #[error("{tool} not found in PATH")]
    ToolNotFound { tool: String },

    /// Strategy cannot run in the current setup (e.g. API-key-only login)
    #[error("not applicable: {0}")]
    NotApplicable(String),

    /// Credential file missing or unreadable
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// Backend rejected the token (401/403)
    #[error("unauthorized: token may be expired, run `codex` to re-authenticate")]
    AuthExpired,

    /// Backend answered with an unexpected status
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Transport-level HTTP failure
    #[error("request failed: {0}")]
    Http(String),

    /// No recognizable usage data
    #[error("failed to parse usage: {0}")]
    ParseFailure(String),

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Spawn, pipe or pty failure
    #[error("subprocess error: {0}")]
    Subprocess(String),

    /// JSON-RPC level error returned by the helper
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Caller cancelled the fetch
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the strategy opted out rather than failed
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, FetchError::NotApplicable(_))
    }

    pub(crate) fn subprocess(context: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Subprocess(format!("{}: {}", context, err))
    }
}

/// Truncate a response body for inclusion in an error message
pub(crate) fn excerpt(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_body_unchanged() {
        assert_eq!(excerpt("  oops  ", 200), "oops");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let body = "é".repeat(10);
        let out = excerpt(&body, 4);
        assert_eq!(out, "éééé…");
    }

    #[test]
    fn test_not_applicable() {
        assert!(FetchError::NotApplicable("api key".into()).is_not_applicable());
        assert!(!FetchError::AuthExpired.is_not_applicable());
    }

    #[test]
    fn test_api_error_message() {
        let err = FetchError::Api {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "API error 502: bad gateway");
    }
}
