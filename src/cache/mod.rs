//! File-backed cache of resolved KimVan redirect targets.
//!
//! The document is a flat JSON object shared with earlier deployments:
//!
//! ```json
//! {
//!   "ID1:TYPEA:COURSEX": "https://dest",
//!   "ID1:TYPEA:COURSEX_timestamp": 1718000000000
//! }
//! ```
//!
//! Entries older than `ttl_days` are stale and get re-resolved by the
//! caller. Entries older than `evict_after_days`, and the oldest entries
//! beyond `max_entries`, are dropped on every write and by the periodic
//! sweep.

use crate::config::CacheConfig;
use crate::persist;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


pub const DAY_MS: f64 = 86_400_000.0;

const TIMESTAMP_SUFFIX: &str = "_timestamp";

/// Cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redirect cache I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("redirect cache is corrupt: {0}")]
    Corrupt(serde_json::Error),
    #[error("failed to encode redirect cache: {0}")]
    Encode(serde_json::Error),
}

/// Composite `"{id}:{type}:{course}"` key built from decoded path segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(id: &str, kind: &str, course: &str) -> Self {
        Self(format!("{}:{}:{}", id, kind, course))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// False when the key would land in another entry's `_timestamp` slot.
    pub fn is_storable(&self) -> bool {
        !self.0.ends_with(TIMESTAMP_SUFFIX)
    }

    fn timestamp_key(&self) -> String {
        format!("{}{}", self.0, TIMESTAMP_SUFFIX)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One value in the flat document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheSlot {
    Timestamp(i64),
    Url(String),
    /// Anything else a foreign writer left behind; preserved untouched.
    Other(serde_json::Value),
}

pub type CacheMap = BTreeMap<String, CacheSlot>;

/// A cached redirect target.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedUrl {
    pub url: String,
    pub timestamp: i64,
    pub age_days: f64,
    pub stale: bool,
}

/// Redirect cache backed by one JSON file.
///
/// # Concurrency
/// Every read-modify-write cycle holds an async mutex and lands via
/// temp-file + rename, so concurrent requests in this process cannot lose
/// each other's updates.
pub struct RedirectCache {
    path: PathBuf,
    ttl_days: f64,
    evict_after_days: f64,
    max_entries: usize,
    lock: Mutex<()>,
}

impl RedirectCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            path: config.file.clone(),
            ttl_days: config.ttl_days,
            evict_after_days: config.evict_after_days,
            max_entries: config.max_entries,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, creating it as `{}` on first use.
    pub async fn read(&self) -> Result<CacheMap, CacheError> {
        match persist::read_optional(&self.path).await? {
            Some(contents) if contents.trim().is_empty() => Ok(CacheMap::new()),
            Some(contents) => serde_json::from_str(&contents).map_err(CacheError::Corrupt),
            None => {
                info!(path = %self.path.display(), "Creating redirect cache file");
                let empty = CacheMap::new();
                self.write(&empty).await?;
                Ok(empty)
            }
        }
    }

    /// Overwrite the document.
    pub async fn write(&self, map: &CacheMap) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(map).map_err(CacheError::Encode)?;
        persist::write_atomic(&self.path, json.as_bytes()).await?;
        Ok(())
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<CachedUrl>, CacheError> {
        self.get_at(key, now_ms()).await
    }

    /// Look up `key` as of `now`.
    ///
    /// An entry with a URL but no timestamp counts as fresh; its timestamp is
    /// backfilled and written as a side effect.
    pub async fn get_at(&self, key: &CacheKey, now: i64) -> Result<Option<CachedUrl>, CacheError> {
        if !key.is_storable() {
            return Ok(None);
        }

        let _guard = self.lock.lock().await;
        let mut map = self.read().await?;

        let Some(CacheSlot::Url(url)) = map.get(key.as_str()).cloned() else {
            return Ok(None);
        };

        let timestamp = match map.get(&key.timestamp_key()) {
            Some(CacheSlot::Timestamp(ts)) => *ts,
            _ => {
                debug!(key = %key, "Backfilling missing cache timestamp");
                map.insert(key.timestamp_key(), CacheSlot::Timestamp(now));
                self.write(&map).await?;
                now
            }
        };

        Ok(Some(CachedUrl {
            url,
            timestamp,
            age_days: age_days(timestamp, now),
            stale: self.is_stale_at(timestamp, now),
        }))
    }

    pub fn is_stale(&self, timestamp: i64) -> bool {
        self.is_stale_at(timestamp, now_ms())
    }

    /// `(now - timestamp) / 1 day > ttl_days`.
    pub fn is_stale_at(&self, timestamp: i64, now: i64) -> bool {
        age_days(timestamp, now) > self.ttl_days
    }

    pub async fn put(&self, key: &CacheKey, url: &str) -> Result<(), CacheError> {
        self.put_at(key, url, now_ms()).await
    }

    /// Record `url` for `key` stamped at `now`, then apply eviction.
    ///
    /// A corrupt document is replaced. Keys that are not storable are
    /// skipped.
    pub async fn put_at(&self, key: &CacheKey, url: &str, now: i64) -> Result<(), CacheError> {
        if !key.is_storable() {
            debug!(key = %key, "Key collides with a timestamp slot, not caching");
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut map = match self.read().await {
            Ok(map) => map,
            Err(CacheError::Corrupt(e)) => {
                warn!(path = %self.path.display(), error = %e, "Replacing corrupt redirect cache");
                CacheMap::new()
            }
            Err(e) => return Err(e),
        };

        map.insert(key.as_str().to_string(), CacheSlot::Url(url.to_string()));
        map.insert(key.timestamp_key(), CacheSlot::Timestamp(now));

        let evicted = self.evict(&mut map, now);
        if evicted > 0 {
            debug!(evicted, "Evicted redirect cache entries");
        }

        self.write(&map).await?;
        debug!(key = %key, "Cached redirect target");
        Ok(())
    }

    pub async fn sweep(&self) -> Result<usize, CacheError> {
        self.sweep_at(now_ms()).await
    }

    /// Apply eviction without adding anything. Returns the number of entries
    /// removed; the file is rewritten only when something changed.
    pub async fn sweep_at(&self, now: i64) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read().await?;

        let evicted = self.evict(&mut map, now);
        if evicted > 0 {
            self.write(&map).await?;
        }
        Ok(evicted)
    }

    /// Number of URL entries currently stored.
    pub async fn entry_count(&self) -> Result<usize, CacheError> {
        let _guard = self.lock.lock().await;
        let map = self.read().await?;
        Ok(map.values().filter(|v| matches!(v, CacheSlot::Url(_))).count())
    }

    /// Drop expired entries, orphan timestamps, then the oldest entries over
    /// `max_entries`. URLs without a timestamp are kept and count as `now`.
    fn evict(&self, map: &mut CacheMap, now: i64) -> usize {
        let orphans: Vec<String> = map
            .iter()
            .filter(|(_, slot)| matches!(slot, CacheSlot::Timestamp(_)))
            .filter_map(|(name, _)| {
                let base = name.strip_suffix(TIMESTAMP_SUFFIX)?;
                (!matches!(map.get(base), Some(CacheSlot::Url(_)))).then(|| name.clone())
            })
            .collect();
        for name in &orphans {
            map.remove(name);
        }

        let mut entries: Vec<(String, i64)> = map
            .iter()
            .filter(|(_, slot)| matches!(slot, CacheSlot::Url(_)))
            .map(|(name, _)| {
                let ts = match map.get(&format!("{}{}", name, TIMESTAMP_SUFFIX)) {
                    Some(CacheSlot::Timestamp(ts)) => *ts,
                    _ => now,
                };
                (name.clone(), ts)
            })
            .collect();

        let mut removed = orphans.len();
        let mut drop_entry = |map: &mut CacheMap, name: &str| {
            map.remove(name);
            map.remove(&format!("{}{}", name, TIMESTAMP_SUFFIX));
            removed += 1;
        };

        entries.retain(|(name, ts)| {
            if age_days(*ts, now) > self.evict_after_days {
                drop_entry(map, name);
                false
            } else {
                true
            }
        });

        if entries.len() > self.max_entries {
            entries.sort_by_key(|(_, ts)| *ts);
            let excess = entries.len() - self.max_entries;
            for (name, _) in entries.iter().take(excess) {
                drop_entry(map, name);
            }
        }

        removed
    }
}

/// Background task to periodically sweep the redirect cache.
pub async fn run_cache_sweep(cache: Arc<RedirectCache>, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        match cache.sweep().await {
            Ok(evicted) => debug!(evicted, "Redirect cache sweep complete"),
            Err(e) => warn!(error = %e, "Redirect cache sweep failed"),
        }
    }
}

fn age_days(timestamp: i64, now: i64) -> f64 {
    now.saturating_sub(timestamp) as f64 / DAY_MS
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
