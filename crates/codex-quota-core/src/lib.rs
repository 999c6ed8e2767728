//! Core library for codex-quota.
//!
//! Determines how much Codex quota is left by trying, in order, a disk cache,
//! the ChatGPT usage endpoint, the `codex app-server` JSON-RPC interface and
//! finally a scripted `/status` run inside a pseudo-terminal.

pub mod config;
pub mod usage;
pub mod utils;

pub use config::Settings;
pub use usage::{
    Bucket, FetchError, LimitWindow, PercentKind, Source, UsageFetcher, UsageSnapshot,
};
