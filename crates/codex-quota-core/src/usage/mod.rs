//! Codex usage acquisition.
//!
//! [`UsageFetcher`] consults the snapshot cache and then runs the configured
//! strategies (OAuth endpoint, app-server RPC, `/status` in a pty) until one
//! produces a [`UsageSnapshot`].

pub mod cache;
pub mod error;
pub mod fetcher;
pub mod oauth;
pub mod parser;
pub mod pty;
pub mod rpc;
pub mod strategy;
pub mod types;
pub mod windows;

#[cfg(all(test, unix))]
mod test_support;

pub use cache::{CacheRecord, DiskCache, MemoryCache, UsageCache};
pub use error::FetchError;
pub use fetcher::UsageFetcher;
pub use oauth::{OAuthClient, OAuthCredential};
pub use parser::{parse_status_output, parse_transcript};
pub use pty::PtyClient;
pub use rpc::{AccountInfo, RpcClient};
pub use strategy::UsageStrategy;
pub use types::{Bucket, Credits, LimitWindow, PercentKind, Source, UsageSnapshot};
