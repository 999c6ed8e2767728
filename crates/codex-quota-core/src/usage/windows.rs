//! Conversion of backend rate-limit windows into a remaining-percentage snapshot.
//!
//! The OAuth endpoint and the app-server RPC report the same two windows with
//! different field names; both funnel through `remaining_snapshot`.

use chrono::{DateTime, Local, TimeZone, Utc};

use super::error::FetchError;
use super::types::{Bucket, Credits, LimitWindow, PercentKind, Source, UsageSnapshot};

/// A backend window before conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawWindow {
    /// Percentage consumed, as reported
    pub used_percent: f64,
    /// Reset time as Unix seconds (0 or absent = unknown)
    pub resets_at: Option<i64>,
}

/// How the reset time of a window is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetStyle {
    /// "05:09"
    TimeOnly,
    /// "16:22 on 10 Feb"
    TimeAndDate,
}

/// Build a snapshot from the primary (5h) and secondary (weekly) windows.
///
/// Percentages become remaining (`100 - used`, floored at 0).
pub fn remaining_snapshot(
    source: Source,
    primary: Option<RawWindow>,
    secondary: Option<RawWindow>,
    plan_type: Option<String>,
    credits: Option<Credits>,
) -> Result<UsageSnapshot, FetchError> {
    if primary.is_none() && secondary.is_none() {
        return Err(FetchError::ParseFailure(
            "no rate limit data available".to_string(),
        ));
    }

    let five_hour_limit = primary
        .map(|w| remaining_window(w, ResetStyle::TimeOnly, &Local))
        .unwrap_or_default();
    let weekly_limit = secondary
        .map(|w| remaining_window(w, ResetStyle::TimeAndDate, &Local))
        .unwrap_or_default();

    let primary_window = if primary.is_some() {
        &five_hour_limit
    } else {
        &weekly_limit
    };

    Ok(UsageSnapshot {
        percentage: primary_window.percentage,
        display: primary_window.display.clone(),
        color: Bucket::from_remaining(primary_window.percentage),
        source,
        percent_kind: PercentKind::Remaining,
        last_fetched: Utc::now(),
        error_message: None,
        five_hour_limit,
        weekly_limit,
        plan_type,
        credits,
    })
}

fn remaining_window<Tz: TimeZone>(window: RawWindow, style: ResetStyle, tz: &Tz) -> LimitWindow
where
    Tz::Offset: std::fmt::Display,
{
    // Clamped as f64 so out-of-range or NaN input never overflows the cast
    let remaining = (100.0 - window.used_percent.trunc()).clamp(0.0, 100.0);
    let remaining = if remaining.is_nan() { 100 } else { remaining as i64 };
    let reset = window
        .resets_at
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|at| format_reset(&at.with_timezone(tz), style));
    LimitWindow::new(remaining, "left", reset)
}

fn format_reset<Tz: TimeZone>(at: &DateTime<Tz>, style: ResetStyle) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match style {
        ResetStyle::TimeOnly => at.format("%H:%M").to_string(),
        ResetStyle::TimeAndDate => at.format("%H:%M on %-d %b").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // 2025-02-10 16:22:00 UTC
    const FEB_10_1622: i64 = 1_739_204_520;

    #[test]
    fn test_remaining_window_clamps_out_of_range_usage() {
        let left = |used_percent: f64| {
            remaining_window(
                RawWindow {
                    used_percent,
                    resets_at: None,
                },
                ResetStyle::TimeOnly,
                &Utc,
            )
            .percentage
        };
        assert_eq!(left(-1e19), 100);
        assert_eq!(left(-5.0), 100);
        assert_eq!(left(1e19), 0);
        assert_eq!(left(250.0), 0);
        assert_eq!(left(f64::NAN), 100);
        assert_eq!(left(37.9), 63);
    }

    #[test]
    fn test_remaining_window_formats_in_utc() {
        let w = RawWindow {
            used_percent: 2.0,
            resets_at: Some(FEB_10_1622),
        };
        let time_only = remaining_window(w, ResetStyle::TimeOnly, &Utc);
        assert_eq!(time_only.percentage, 98);
        assert_eq!(time_only.display, "98% left (resets 16:22)");

        let dated = remaining_window(w, ResetStyle::TimeAndDate, &Utc);
        assert_eq!(
            dated.reset_descriptor.as_deref(),
            Some("16:22 on 10 Feb")
        );
        assert_eq!(dated.display, "98% left (resets 16:22 on 10 Feb)");
    }

    #[test]
    fn test_overused_window_floors_at_zero() {
        let w = RawWindow {
            used_percent: 130.0,
            resets_at: None,
        };
        let window = remaining_window(w, ResetStyle::TimeOnly, &Utc);
        assert_eq!(window.percentage, 0);
        assert_eq!(window.display, "0% left");
        assert!(window.reset_descriptor.is_none());
    }

    #[test]
    fn test_zero_reset_is_unknown() {
        let w = RawWindow {
            used_percent: 10.0,
            resets_at: Some(0),
        };
        assert!(remaining_window(w, ResetStyle::TimeOnly, &Utc)
            .reset_descriptor
            .is_none());
    }

    #[test]
    fn test_primary_used_82_is_critical() {
        let snap = remaining_snapshot(
            Source::Rpc,
            Some(RawWindow {
                used_percent: 82.0,
                resets_at: None,
            }),
            None,
            None,
            None,
        )
        .unwrap();
        assert_eq!(snap.percentage, 18);
        assert_eq!(snap.color, Bucket::Critical);
        assert_eq!(snap.percent_kind, PercentKind::Remaining);
        assert_eq!(snap.weekly_limit, LimitWindow::empty());
    }

    #[test]
    fn test_secondary_only_becomes_primary() {
        let snap = remaining_snapshot(
            Source::OAuth,
            None,
            Some(RawWindow {
                used_percent: 65.5,
                resets_at: None,
            }),
            Some("plus".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(snap.percentage, 35);
        assert_eq!(snap.color, Bucket::Caution);
        assert_eq!(snap.display, "35% left");
        assert_eq!(snap.plan_type.as_deref(), Some("plus"));
    }

    #[test]
    fn test_no_windows_is_error() {
        let err = remaining_snapshot(Source::OAuth, None, None, None, None).unwrap_err();
        assert!(matches!(err, FetchError::ParseFailure(_)));
    }
}
