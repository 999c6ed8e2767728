//! Snapshot cache consulted before any live strategy runs.
//!
//! On disk the record lives at `<cache_dir>/codex-quota/<tool>-usage.json`.
//! Stale records are ignored, never deleted; the next successful fetch
//! overwrites them.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::UsageSnapshot;

/// Directory name under the platform cache dir
pub const CACHE_DIR_NAME: &str = "codex-quota";

/// A persisted snapshot; its `lastFetched` is the record timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheRecord {
    pub snapshot: UsageSnapshot,
}

impl CacheRecord {
    pub fn new(snapshot: UsageSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.snapshot.last_fetched
    }

    /// Valid while `now - fetched_at < ttl`.
    ///
    /// A timestamp in the future counts as fresh, with no upper bound. A
    /// skewed clock or hand-edited file therefore holds the record until
    /// `cache clear` or `--refresh`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => ttl,
            Err(_) => return true,
        };
        self.snapshot.age(now) < ttl
    }
}

/// Storage port for the orchestrator
pub trait UsageCache: Send + Sync {
    /// Last stored record, fresh or not. `Ok(None)` when nothing is stored.
    fn load(&self) -> Result<Option<CacheRecord>>;

    /// Replace the stored record
    fn save(&self, record: &CacheRecord) -> Result<()>;

    /// Forget the stored record
    fn clear(&self) -> Result<()>;
}

/// JSON file store with atomic replace
#[derive(Debug, Clone)]
pub struct DiskCache {
    path: PathBuf,
}

impl DiskCache {
    /// Cache for `tool` under the platform cache directory (or `base_dir`).
    ///
    /// Only alphanumeric, `-` and `_` are accepted in `tool`, so the file
    /// name cannot escape the cache directory.
    pub fn for_tool(tool: &str, base_dir: Option<&Path>) -> Result<Self> {
        if tool.is_empty() {
            bail!("Cache tool name cannot be empty");
        }
        if !tool
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!(
                "Invalid cache tool name: '{}'. Only alphanumeric, '-', and '_' characters are allowed.",
                tool
            );
        }

        let dir = match base_dir {
            Some(dir) => dir.to_path_buf(),
            None => dirs::cache_dir()
                .context("Failed to determine cache directory")?
                .join(CACHE_DIR_NAME),
        };
        Ok(Self::at(dir.join(format!("{}-usage.json", tool))))
    }

    /// Cache backed by an explicit file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UsageCache for DiskCache {
    fn load(&self) -> Result<Option<CacheRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read cache file: {:?}", self.path))
            }
        };

        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache file: {:?}", self.path))?;
        Ok(Some(record))
    }

    /// Uses a temp file and rename so readers never see a partial record.
    fn save(&self, record: &CacheRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create cache directory: {:?}", dir))?;
        }

        let json = serde_json::to_string_pretty(record).context("Failed to serialize cache record")?;
        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));

        // Leftover from an interrupted write
        let _ = fs::remove_file(&temp_path);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp cache file: {:?}", temp_path))?;

        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write temp cache file: {:?}", temp_path))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temp cache file: {:?}", temp_path))?;

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename cache file: {:?}", self.path))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove cache file: {:?}", self.path)),
        }
    }
}

/// In-process store, for embedding callers and tests
#[derive(Debug, Default)]
pub struct MemoryCache {
    record: Mutex<Option<CacheRecord>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-seeded with `snapshot`
    pub fn with_snapshot(snapshot: UsageSnapshot) -> Self {
        Self {
            record: Mutex::new(Some(CacheRecord::new(snapshot))),
        }
    }
}

impl UsageCache for MemoryCache {
    fn load(&self) -> Result<Option<CacheRecord>> {
        Ok(self.record.lock().clone())
    }

    fn save(&self, record: &CacheRecord) -> Result<()> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.record.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::types::{Bucket, LimitWindow, PercentKind, Source};
    use pretty_assertions::assert_eq;

    fn snapshot_at(last_fetched: DateTime<Utc>) -> UsageSnapshot {
        UsageSnapshot {
            percentage: 45,
            display: "45% used (resets in 2h 30m)".to_string(),
            color: Bucket::Healthy,
            source: Source::Cli,
            percent_kind: PercentKind::Used,
            last_fetched,
            error_message: None,
            five_hour_limit: LimitWindow::new(45, "used", Some("in 2h 30m".to_string())),
            weekly_limit: LimitWindow::new(10, "used", Some("in 4 days".to_string())),
            plan_type: None,
            credits: None,
        }
    }

    #[test]
    fn test_freshness_boundary() {
        let now = Utc::now();
        let ttl = Duration::from_secs(300);

        let fresh = CacheRecord::new(snapshot_at(now - chrono::Duration::seconds(299)));
        assert!(fresh.is_fresh(now, ttl));

        let stale = CacheRecord::new(snapshot_at(now - chrono::Duration::seconds(300)));
        assert!(!stale.is_fresh(now, ttl));

        let ancient = CacheRecord::new(snapshot_at(now - chrono::Duration::hours(2)));
        assert!(!ancient.is_fresh(now, ttl));
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let now = Utc::now();
        let record = CacheRecord::new(snapshot_at(now + chrono::Duration::days(30)));
        assert!(record.is_fresh(now, Duration::from_secs(300)));
    }

    #[test]
    fn test_zero_ttl_never_fresh() {
        let now = Utc::now();
        let record = CacheRecord::new(snapshot_at(now));
        assert!(!record.is_fresh(now, Duration::ZERO));
    }

    #[test]
    fn test_disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::for_tool("codex", Some(dir.path())).unwrap();
        assert_eq!(cache.path(), dir.path().join("codex-usage.json"));
        assert!(cache.load().unwrap().is_none());

        let record = CacheRecord::new(snapshot_at(Utc::now()));
        cache.save(&record).unwrap();
        assert_eq!(cache.load().unwrap(), Some(record));

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_disk_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::for_tool("codex", Some(dir.path())).unwrap();
        cache.save(&CacheRecord::new(snapshot_at(Utc::now()))).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(cache.path()).unwrap()).unwrap();
        assert_eq!(json["percentage"], 45);
        assert_eq!(json["source"], "cli");
        assert!(json["lastFetched"].is_string());
        assert_eq!(json["fiveHourLimit"]["resetDescriptor"], "in 2h 30m");
        assert_eq!(json["weeklyLimit"]["percentage"], 10);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::for_tool("codex", Some(dir.path())).unwrap();
        cache.save(&CacheRecord::new(snapshot_at(Utc::now()))).unwrap();

        let mut newer = snapshot_at(Utc::now());
        newer.percentage = 70;
        cache.save(&CacheRecord::new(newer)).unwrap();

        assert_eq!(cache.load().unwrap().unwrap().snapshot.percentage, 70);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::for_tool("codex", Some(dir.path())).unwrap();
        fs::write(cache.path(), "{not json").unwrap();
        assert!(cache.load().is_err());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::for_tool("codex", Some(dir.path())).unwrap();
        cache.clear().unwrap();
        cache.save(&CacheRecord::new(snapshot_at(Utc::now()))).unwrap();
        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert!(DiskCache::for_tool("../etc", None).is_err());
        assert!(DiskCache::for_tool("", None).is_err());
        assert!(DiskCache::for_tool("codex/x", None).is_err());
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert!(cache.load().unwrap().is_none());
        let record = CacheRecord::new(snapshot_at(Utc::now()));
        cache.save(&record).unwrap();
        assert_eq!(cache.load().unwrap(), Some(record));
        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
    }
}
