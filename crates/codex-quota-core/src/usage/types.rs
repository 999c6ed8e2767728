//! Usage data types shared by every acquisition strategy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Where a snapshot came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// ChatGPT backend usage endpoint
    OAuth,
    /// `codex app-server` JSON-RPC
    Rpc,
    /// Scraped `/status` output from the interactive CLI
    Cli,
    /// Fresh disk cache hit
    Cache,
    /// Every strategy failed
    #[default]
    Default,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::OAuth => "oauth",
            Source::Rpc => "rpc",
            Source::Cli => "cli",
            Source::Cache => "cache",
            Source::Default => "default",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meaning of a snapshot's percentages.
///
/// Scraped `/status` output is normalized to "used"; the JSON backends report
/// "remaining". See `Bucket` for how each maps to a severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentKind {
    #[default]
    Used,
    Remaining,
}

/// Severity bucket used by renderers to pick a color
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    #[default]
    Healthy,
    Caution,
    Critical,
}

impl Bucket {
    /// Bucket for a used percentage: <60 healthy, 60-79 caution, >=80 critical
    pub fn from_used(percent: u8) -> Self {
        if percent >= 80 {
            Bucket::Critical
        } else if percent >= 60 {
            Bucket::Caution
        } else {
            Bucket::Healthy
        }
    }

    /// Bucket for a remaining percentage: <=20 critical, <=40 caution, else healthy
    pub fn from_remaining(percent: u8) -> Self {
        if percent <= 20 {
            Bucket::Critical
        } else if percent <= 40 {
            Bucket::Caution
        } else {
            Bucket::Healthy
        }
    }

    /// Bucket for a percentage under the given convention
    pub fn for_kind(kind: PercentKind, percent: u8) -> Self {
        match kind {
            PercentKind::Used => Self::from_used(percent),
            PercentKind::Remaining => Self::from_remaining(percent),
        }
    }
}

/// One rate-limit window (5h or weekly)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitWindow {
    /// 0-100, meaning given by the snapshot's `percent_kind`
    pub percentage: u8,
    /// Human-readable form, e.g. "45% used (resets in 2h 30m)"
    pub display: String,
    /// Free-form reset hint: "in 2h 30m", "03:31", "03:31 on 5 Feb"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_descriptor: Option<String>,
}

impl LimitWindow {
    /// Build a window, clamping the percentage and rendering the display string.
    ///
    /// `suffix` is the unit word shown after the percentage ("used" or "left").
    pub fn new(percentage: i64, suffix: &str, reset_descriptor: Option<String>) -> Self {
        let percentage = clamp_percent(percentage);
        let display = match &reset_descriptor {
            Some(reset) => format!("{}% {} (resets {})", percentage, suffix, reset),
            None => format!("{}% {}", percentage, suffix),
        };
        Self {
            percentage,
            display,
            reset_descriptor,
        }
    }

    /// A window with no data
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Credit balance reported alongside rate limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credits {
    #[serde(default)]
    pub has_credits: bool,
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

/// Normalized, point-in-time usage record returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    /// Primary-window percentage (5h if known, else weekly)
    pub percentage: u8,
    /// Human-readable primary value
    pub display: String,
    /// Severity bucket of `percentage`
    pub color: Bucket,
    pub source: Source,
    #[serde(default)]
    pub percent_kind: PercentKind,
    pub last_fetched: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub five_hour_limit: LimitWindow,
    #[serde(default)]
    pub weekly_limit: LimitWindow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<Credits>,
}

impl UsageSnapshot {
    /// Sentinel returned when no strategy produced data.
    ///
    /// Windows are zeroed and the cache is never written with it.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            percentage: 0,
            display: "unknown".to_string(),
            color: Bucket::Healthy,
            source: Source::Default,
            percent_kind: PercentKind::Used,
            last_fetched: Utc::now(),
            error_message: Some(reason.into()),
            five_hour_limit: LimitWindow::empty(),
            weekly_limit: LimitWindow::empty(),
            plan_type: None,
            credits: None,
        }
    }

    /// Age of the data relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_fetched)
    }

    /// Whether this is the fallback sentinel
    pub fn is_unavailable(&self) -> bool {
        self.source == Source::Default
    }
}

/// Clamp any integer into 0..=100
pub fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Accept a JSON string or number and keep it as text
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
