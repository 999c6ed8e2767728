//! Acquisition orchestrator: cache first, then each live strategy once.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheRecord, DiskCache, UsageCache};
use super::strategy::{strategies_from_settings, UsageStrategy};
use super::types::{Source, UsageSnapshot};
use crate::config::Settings;

/// Cache key for the Codex CLI
pub const TOOL_NAME: &str = "codex";

/// Runs the strategy chain behind a TTL cache.
///
/// Never fails: when nothing works the caller gets
/// [`UsageSnapshot::unavailable`] describing every failure.
pub struct UsageFetcher {
    strategies: Vec<Box<dyn UsageStrategy>>,
    cache: Arc<dyn UsageCache>,
    ttl: Duration,
}

impl UsageFetcher {
    pub fn new(
        strategies: Vec<Box<dyn UsageStrategy>>,
        cache: Arc<dyn UsageCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            strategies,
            cache,
            ttl,
        }
    }

    /// Configured strategy chain over the on-disk cache
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let cache = DiskCache::for_tool(TOOL_NAME, settings.cache_dir.as_deref())?;
        Ok(Self::new(
            strategies_from_settings(settings),
            Arc::new(cache),
            settings.cache_ttl(),
        ))
    }

    pub fn cache(&self) -> &Arc<dyn UsageCache> {
        &self.cache
    }

    /// Fresh cached snapshot if any, else the first live success, else the
    /// sentinel. Only live successes are written to the cache.
    pub async fn get_usage(&self, cancel: &CancellationToken) -> UsageSnapshot {
        if let Some(snapshot) = self.fresh_cached() {
            return snapshot;
        }
        self.fetch_live(cancel).await
    }

    /// Like [`get_usage`](Self::get_usage) but skips the cache read
    pub async fn refresh(&self, cancel: &CancellationToken) -> UsageSnapshot {
        self.fetch_live(cancel).await
    }

    fn fresh_cached(&self) -> Option<UsageSnapshot> {
        let record = match self.cache.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No cached usage");
                return None;
            }
            Err(e) => {
                warn!("Usage cache unreadable: {:#}", e);
                return None;
            }
        };

        let now = Utc::now();
        if !record.is_fresh(now, self.ttl) {
            debug!(
                "Cached usage is stale ({}s old)",
                record.snapshot.age(now).num_seconds()
            );
            return None;
        }

        debug!("Using cached usage from {}", record.fetched_at());
        let mut snapshot = record.snapshot;
        snapshot.source = Source::Cache;
        Some(snapshot)
    }

    async fn fetch_live(&self, cancel: &CancellationToken) -> UsageSnapshot {
        let mut failures: Vec<String> = Vec::new();

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                failures.push("cancelled".to_string());
                break;
            }

            match strategy.attempt(cancel).await {
                Ok(snapshot) => {
                    info!(
                        "Usage from {}: {} ({:?})",
                        strategy.name(),
                        snapshot.display,
                        snapshot.color
                    );
                    if let Err(e) = self.cache.save(&CacheRecord::new(snapshot.clone())) {
                        warn!("Failed to write usage cache: {:#}", e);
                    }
                    return snapshot;
                }
                Err(e) if e.is_not_applicable() => {
                    debug!("Skipping {}: {}", strategy.name(), e);
                }
                Err(e) => {
                    warn!("Usage strategy {} failed: {}", strategy.name(), e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no usage strategy available".to_string()
        } else {
            failures.join("; ")
        };
        warn!("Usage unavailable: {}", reason);
        UsageSnapshot::unavailable(reason)
    }
}
