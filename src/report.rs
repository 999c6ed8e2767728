//! Plain-text rendering of snapshots for the terminal.

use codex_quota_core::usage::AccountInfo;
use codex_quota_core::{LimitWindow, PercentKind, UsageSnapshot};

/// Multi-line summary of a snapshot
pub fn render_usage(snapshot: &UsageSnapshot) -> String {
    if snapshot.is_unavailable() {
        let reason = snapshot.error_message.as_deref().unwrap_or("no data");
        return format!("Codex usage: unknown ({})\n", reason);
    }

    let mut out = String::new();
    push_window(&mut out, "5h limit:", &snapshot.five_hour_limit);
    push_window(&mut out, "Weekly limit:", &snapshot.weekly_limit);

    let kind = match snapshot.percent_kind {
        PercentKind::Used => "used",
        PercentKind::Remaining => "remaining",
    };
    out.push_str(&format!(
        "source: {}, {}% {}, {:?}",
        snapshot.source, snapshot.percentage, kind, snapshot.color
    ));
    if let Some(plan) = &snapshot.plan_type {
        out.push_str(&format!(", plan: {}", plan));
    }
    out.push('\n');

    if let Some(credits) = &snapshot.credits {
        if credits.unlimited {
            out.push_str("credits: unlimited\n");
        } else if let Some(balance) = &credits.balance {
            out.push_str(&format!("credits: {}\n", balance));
        }
    }
    out
}

fn push_window(out: &mut String, label: &str, window: &LimitWindow) {
    if window.display.is_empty() {
        return;
    }
    out.push_str(&format!("{:<14}{}\n", label, window.display));
}

/// Summary of `account/read`
pub fn render_account(info: &AccountInfo) -> String {
    match &info.account {
        Some(account) => {
            let mut out = format!("login: {}\n", account.kind);
            if let Some(email) = &account.email {
                out.push_str(&format!("email: {}\n", email));
            }
            if let Some(plan) = &account.plan_type {
                out.push_str(&format!("plan: {}\n", plan));
            }
            out
        }
        None if info.requires_openai_auth => "not logged in\n".to_string(),
        None => "no account information\n".to_string(),
    }
}
