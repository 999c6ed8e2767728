//! Parse Codex `/status` output captured from the interactive CLI.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::FetchError;
use super::types::{Bucket, LimitWindow, PercentKind, Source, UsageSnapshot};
use crate::utils::strip_ansi;

static USED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%\s*used").unwrap());
static LEFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%\s*(?:left|remaining)").unwrap());
static RESET_IN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"resets\s+in\s+([^)\r\n]+)").unwrap());
static RESET_ON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"resets\s+(\d{1,2}:\d{2})\s+on\s+(\d{1,2}\s+[A-Za-z]+)").unwrap()
});
static RESET_AT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"resets\s+(\d{1,2}:\d{2})").unwrap());

/// Values read from one limit line
#[derive(Debug, Default)]
struct WindowReading {
    used: Option<i64>,
    reset: Option<String>,
}

impl WindowReading {
    fn absorb(&mut self, line: &str) {
        if let Some(used) = extract_used_percent(line) {
            self.used = Some(used);
        }
        if let Some(reset) = extract_reset(line) {
            self.reset = Some(reset);
        }
    }

    fn into_window(self) -> LimitWindow {
        match self.used {
            Some(used) => LimitWindow::new(used, "used", self.reset),
            None => LimitWindow::empty(),
        }
    }
}

/// Parse a raw pty transcript (ANSI sequences included).
pub fn parse_transcript(raw: &str) -> Result<UsageSnapshot, FetchError> {
    parse_status_output(&strip_ansi(raw))
}

/// Parse ANSI-stripped `/status` text into a used-percentage snapshot.
///
/// Both format generations are understood:
/// ```text
///   5h limit: 45% used (resets in 2h 30m)
///   Weekly limit: 10% used (resets in 4 days)
///
///   5h limit:     [██████████████████░░] 92% left (resets 03:31)
///   Weekly limit: [███████████████░░░░░] 76% left (resets 03:31 on 5 Feb)
/// ```
/// "left"/"remaining" values are converted to used. Later lines override
/// earlier ones, so a redrawn status panel yields its final state.
pub fn parse_status_output(text: &str) -> Result<UsageSnapshot, FetchError> {
    let mut five_hour = WindowReading::default();
    let mut weekly = WindowReading::default();

    for line in text.lines() {
        if is_five_hour_line(line) {
            five_hour.absorb(line);
        }
        if is_weekly_line(line) {
            weekly.absorb(line);
        }
    }

    if five_hour.used.is_none() && weekly.used.is_none() {
        return Err(FetchError::ParseFailure(
            "no usage data in status output".to_string(),
        ));
    }

    let five_hour_found = five_hour.used.is_some();
    let five_hour_limit = five_hour.into_window();
    let weekly_limit = weekly.into_window();

    // 5h window is primary; weekly stands in when the 5h line is absent
    let primary = if five_hour_found {
        &five_hour_limit
    } else {
        &weekly_limit
    };

    Ok(UsageSnapshot {
        percentage: primary.percentage,
        display: primary.display.clone(),
        color: Bucket::from_used(primary.percentage),
        source: Source::Cli,
        percent_kind: PercentKind::Used,
        last_fetched: Utc::now(),
        error_message: None,
        five_hour_limit,
        weekly_limit,
        plan_type: None,
        credits: None,
    })
}

fn is_five_hour_line(line: &str) -> bool {
    line.contains("5h limit") || line.contains("5-hour")
}

fn is_weekly_line(line: &str) -> bool {
    line.contains("Weekly limit") || line.contains("weekly")
}

/// Extract a used percentage, converting "left"/"remaining" values.
///
/// Decimals truncate toward zero after conversion, so "42.5% used" and
/// "57.5% left" both yield 42.
fn extract_used_percent(line: &str) -> Option<i64> {
    if let Some(value) = capture_number(&USED_RE, line) {
        return Some(value.trunc() as i64);
    }
    capture_number(&LEFT_RE, line).map(|left| (100.0 - left).trunc() as i64)
}

fn capture_number(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)?.get(1)?.as_str().parse::<f64>().ok()
}

/// Extract the reset hint: relative "in …", then "HH:MM on D Mon", then "HH:MM"
fn extract_reset(line: &str) -> Option<String> {
    if let Some(caps) = RESET_IN_RE.captures(line) {
        return Some(format!("in {}", caps[1].trim()));
    }
    if let Some(caps) = RESET_ON_RE.captures(line) {
        return Some(format!("{} on {}", &caps[1], &caps[2]));
    }
    RESET_AT_RE
        .captures(line)
        .map(|caps| caps[1].to_string())
}
